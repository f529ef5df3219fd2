//! Typed commands parsed from wire invocations.
//!
//! Parsing checks arity and argument types only. Nothing here touches the
//! keyspace, so a rejected invocation never changes state or reaches the log.

use crate::error::CommandError;
use crate::resp::Invocation;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping { message: Option<String> },
    Echo { message: String },
    Set { key: String, value: String },
    Get { key: String },
    Del { key: String },
    Expire { key: String, seconds: i64 },
    Ttl { key: String },
    TSet { key: String, vector: Vec<f32> },
    TGet { key: String },
    VSearch { query: Vec<f32>, k: i64 },
    HSet { key: String, fields: Vec<(String, String)> },
    HGet { key: String, field: String },
    HDel { key: String, fields: Vec<String> },
    HGetAll { key: String },
    HExists { key: String, field: String },
    HLen { key: String },
    Multi,
    Exec,
    Discard,
}

impl Command {
    /// Parses an invocation. The command name is case-insensitive.
    pub fn parse(inv: &Invocation) -> Result<Command, CommandError> {
        let name = inv.command();
        let args = inv.args();
        let arity = || CommandError::WrongArity(name.to_ascii_lowercase());

        let command = match name.as_str() {
            "PING" => match args {
                [] => Command::Ping { message: None },
                [message] => Command::Ping { message: Some(message.clone()) },
                _ => return Err(arity()),
            },
            "ECHO" => match args {
                [message] => Command::Echo { message: message.clone() },
                _ => return Err(arity()),
            },
            "SET" => match args {
                [key, value] => Command::Set { key: key.clone(), value: value.clone() },
                _ => return Err(arity()),
            },
            "GET" => Command::Get { key: single_key(args).ok_or_else(arity)? },
            "DEL" => Command::Del { key: single_key(args).ok_or_else(arity)? },
            "EXPIRE" => match args {
                [key, seconds] => Command::Expire {
                    key: key.clone(),
                    seconds: seconds.parse().map_err(|_| CommandError::NotAnInteger)?,
                },
                _ => return Err(arity()),
            },
            "TTL" => Command::Ttl { key: single_key(args).ok_or_else(arity)? },
            "TSET" => match args {
                [key, components @ ..] if !components.is_empty() => Command::TSet {
                    key: key.clone(),
                    vector: parse_components(components)?,
                },
                _ => return Err(arity()),
            },
            "TGET" => Command::TGet { key: single_key(args).ok_or_else(arity)? },
            "VSEARCH" => match args {
                [components @ .., k] if !components.is_empty() => Command::VSearch {
                    k: k.parse().map_err(|_| CommandError::InvalidK)?,
                    query: parse_components(components)?,
                },
                _ => return Err(arity()),
            },
            "HSET" => match args {
                [key, pairs @ ..] if !pairs.is_empty() && pairs.len() % 2 == 0 => Command::HSet {
                    key: key.clone(),
                    fields: pairs
                        .chunks_exact(2)
                        .map(|pair| (pair[0].clone(), pair[1].clone()))
                        .collect(),
                },
                _ => return Err(arity()),
            },
            "HGET" => match args {
                [key, field] => Command::HGet { key: key.clone(), field: field.clone() },
                _ => return Err(arity()),
            },
            "HDEL" => match args {
                [key, fields @ ..] if !fields.is_empty() => Command::HDel {
                    key: key.clone(),
                    fields: fields.to_vec(),
                },
                _ => return Err(arity()),
            },
            "HGETALL" => Command::HGetAll { key: single_key(args).ok_or_else(arity)? },
            "HEXISTS" => match args {
                [key, field] => Command::HExists { key: key.clone(), field: field.clone() },
                _ => return Err(arity()),
            },
            "HLEN" => Command::HLen { key: single_key(args).ok_or_else(arity)? },
            "MULTI" | "EXEC" | "DISCARD" if !args.is_empty() => return Err(arity()),
            "MULTI" => Command::Multi,
            "EXEC" => Command::Exec,
            "DISCARD" => Command::Discard,
            _ => return Err(CommandError::UnknownCommand(name.clone())),
        };

        Ok(command)
    }

    /// Whether executing this command changes the keyspace and must be
    /// recorded in the persistence log.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Set { .. }
                | Command::Del { .. }
                | Command::Expire { .. }
                | Command::TSet { .. }
                | Command::HSet { .. }
                | Command::HDel { .. }
        )
    }

    /// Whether `inv` names a transaction control command. Decided by name
    /// alone, so a malformed MULTI/EXEC/DISCARD is never queued.
    pub fn is_control(inv: &Invocation) -> bool {
        matches!(inv.command().as_str(), "MULTI" | "EXEC" | "DISCARD")
    }
}

fn single_key(args: &[String]) -> Option<String> {
    match args {
        [key] => Some(key.clone()),
        _ => None,
    }
}

fn parse_components(args: &[String]) -> Result<Vec<f32>, CommandError> {
    args.iter()
        .map(|s| s.parse::<f32>().map_err(|_| CommandError::InvalidFloat))
        .collect()
}

#[cfg(test)]
mod command_test {
    use super::*;

    fn parse(line: &str) -> Result<Command, CommandError> {
        Command::parse(&Invocation::from_line(line).unwrap())
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            parse("set foo bar").unwrap(),
            Command::Set { key: "foo".to_string(), value: "bar".to_string() }
        );
        assert_eq!(parse("GeT foo").unwrap(), Command::Get { key: "foo".to_string() });
    }

    #[test]
    fn test_parse_arity_errors() {
        for line in ["SET foo", "GET", "DEL a b", "TTL", "TSET v", "VSEARCH 3", "HSET h f", "HGET h", "HDEL h", "MULTI now"] {
            match parse(line) {
                Err(CommandError::WrongArity(_)) => {}
                other => panic!("{}: expected arity error, got {:?}", line, other),
            }
        }

        let err = parse("set foo").unwrap_err();
        assert_eq!(err.to_string(), "ERR wrong number of arguments for 'set' command");
    }

    #[test]
    fn test_parse_vectors() {
        assert_eq!(
            parse("TSET v 0.1 0.2 0.3").unwrap(),
            Command::TSet { key: "v".to_string(), vector: vec![0.1, 0.2, 0.3] }
        );
        assert!(matches!(parse("TSET v 0.1 abc"), Err(CommandError::InvalidFloat)));
    }

    #[test]
    fn test_parse_vsearch_takes_k_last() {
        assert_eq!(
            parse("VSEARCH 0.1 0.2 0.3 1").unwrap(),
            Command::VSearch { query: vec![0.1, 0.2, 0.3], k: 1 }
        );
        assert!(matches!(parse("VSEARCH 0.1 0.2 x"), Err(CommandError::InvalidK)));
        assert!(matches!(parse("VSEARCH 0.1 y 2"), Err(CommandError::InvalidFloat)));
    }

    #[test]
    fn test_parse_expire_seconds() {
        assert_eq!(
            parse("EXPIRE k 10").unwrap(),
            Command::Expire { key: "k".to_string(), seconds: 10 }
        );
        assert!(matches!(parse("EXPIRE k soon"), Err(CommandError::NotAnInteger)));
    }

    #[test]
    fn test_parse_hset_pairs() {
        let cmd = parse("HSET h a 1 b 2").unwrap();
        assert_eq!(
            cmd,
            Command::HSet {
                key: "h".to_string(),
                fields: vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())],
            }
        );
        assert!(matches!(parse("HSET h a 1 b"), Err(CommandError::WrongArity(_))));
    }

    #[test]
    fn test_unknown_command() {
        let err = parse("flushall").unwrap_err();
        assert_eq!(err.to_string(), "ERR unknown command 'FLUSHALL'");
    }

    #[test]
    fn test_mutating_classification() {
        assert!(parse("SET a b").unwrap().is_mutating());
        assert!(parse("HDEL h f").unwrap().is_mutating());
        assert!(parse("EXPIRE a 1").unwrap().is_mutating());
        assert!(!parse("GET a").unwrap().is_mutating());
        assert!(!parse("VSEARCH 1 1").unwrap().is_mutating());
        assert!(Command::is_control(&Invocation::from_line("exec").unwrap()));
        assert!(Command::is_control(&Invocation::from_line("MULTI extra").unwrap()));
        assert!(!Command::is_control(&Invocation::from_line("SET a 1").unwrap()));
    }
}
