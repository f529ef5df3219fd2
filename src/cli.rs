use clap::{Parser, Subcommand};
use kvdb::{Config, ConfigError, Db, Invocation, Session, Value};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "kvdb", version, about = "Typed in-memory key-value store with vector search")]
pub struct Cli {
    /// Defaults to an in-memory REPL
    #[command(subcommand)]
    pub mode: Option<Mode>,
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Serve clients over TCP
    Serve {
        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen address, e.g. 0.0.0.0:6379
        #[arg(long)]
        bind: Option<String>,
        /// Persistence log location
        #[arg(long)]
        aof: Option<PathBuf>,
        /// Run without a persistence log
        #[arg(long)]
        no_aof: bool,
    },
    /// Interactive session against a local database
    Repl {
        /// Replay and extend this log; in-memory when omitted
        #[arg(long)]
        aof: Option<PathBuf>,
    },
}

impl Mode {
    /// Builds the effective config: defaults, then the config file, then flags.
    pub fn config(&self) -> Result<Config, ConfigError> {
        match self {
            Mode::Serve { config, bind, aof, no_aof } => {
                let mut cfg = match config {
                    Some(path) => Config::load(path)?,
                    None => Config::default(),
                };
                if let Some(bind) = bind {
                    cfg.bind = bind.clone();
                }
                if let Some(aof) = aof {
                    cfg.aof_path = aof.clone();
                }
                if *no_aof {
                    cfg.appendonly = false;
                }
                Ok(cfg)
            }
            Mode::Repl { aof } => Ok(Config {
                aof_path: aof.clone().unwrap_or_else(|| Config::default().aof_path),
                appendonly: aof.is_some(),
                log_level: "warn".to_string(),
                ..Config::default()
            }),
        }
    }
}

/// REPL mode - interactive session with persistent database
pub fn run_repl(db: Db) {
    println!("KVDB - Typed Key-Value Store");
    println!("Type 'help' for commands, 'exit' or 'quit' to quit\n");

    let mut session = Session::new(db);

    loop {
        if session.in_transaction() {
            print!("kvdb(TX:{})> ", session.queued());
        } else {
            print!("kvdb> ");
        }
        if io::stdout().flush().is_err() {
            break;
        }

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                eprintln!("Error reading input: {}", error);
                continue;
            }
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input == "exit" || input == "quit" {
            println!("Goodbye!");
            break;
        }

        if input == "help" {
            print_help();
            continue;
        }

        let Some(inv) = Invocation::from_line(input) else {
            continue;
        };
        println!("{}", format_reply(&session.handle(inv)));
    }
}

/// Renders a reply the way interactive clients usually show it.
pub fn format_reply(reply: &Value) -> String {
    match reply {
        Value::Simple(s) => s.clone(),
        Value::Error(e) => format!("(error) {}", e),
        Value::Integer(n) => format!("(integer) {}", n),
        Value::Bulk(s) => format!("{:?}", s),
        Value::Null => "(nil)".to_string(),
        Value::Array(items) if items.is_empty() => "(empty array)".to_string(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}) {}", i + 1, format_reply(item)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  SET <key> <value>                - Store a string");
    println!("  GET <key>                        - Read a string");
    println!("  DEL <key>                        - Delete a key");
    println!("  EXPIRE <key> <seconds>           - Set a time to live");
    println!("  TTL <key>                        - Seconds left (-1 none, -2 missing)");
    println!("  TSET <key> <v1> <v2> ...         - Store a vector");
    println!("  TGET <key>                       - Read a vector");
    println!("  VSEARCH <v1> <v2> ... <k>        - Nearest vectors by cosine distance");
    println!("  HSET <key> <field> <value> ...   - Set hash fields");
    println!("  HGET <key> <field>               - Read a hash field");
    println!("  HDEL <key> <field> ...           - Delete hash fields");
    println!("  HGETALL <key>                    - All fields and values");
    println!("  HEXISTS <key> <field>            - Whether a field exists");
    println!("  HLEN <key>                       - Number of fields");
    println!("  MULTI / EXEC / DISCARD           - Queue and commit a batch");
    println!("  help                             - Show this help");
    println!("  exit, quit                       - Exit the program");
}
