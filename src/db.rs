//! The database module
//! Executes parsed commands against the keyspace and the persistence log.
//!
//! Every mutating command follows the same order while the exclusive section
//! is held: check kind preconditions, append to the log, then mutate. A
//! command that fails at either of the first two steps leaves the keyspace
//! untouched, so the log never lags behind memory.

use crate::aof::{AppendLog, Journal};
use crate::command::Command;
use crate::error::{CommandError, PersistError, WrongKind};
use crate::keyspace::{Keyspace, Kind, Store};
use crate::resp::{Invocation, Value};
use crate::vector::nearest;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Db {
    keyspace: Arc<Keyspace>,
    journal: Option<Arc<dyn Journal>>,
}

impl Db {
    pub fn new(keyspace: Arc<Keyspace>, journal: Option<Arc<dyn Journal>>) -> Self {
        Db { keyspace, journal }
    }

    /// A database with no persistence.
    ///
    /// # Examples
    ///
    /// ```
    /// use kvdb::{Command, Db, Invocation, Value};
    ///
    /// let db = Db::in_memory();
    /// let inv = Invocation::from_line("SET foo bar").unwrap();
    /// let cmd = Command::parse(&inv).unwrap();
    /// assert_eq!(db.execute(&inv, &cmd), Value::ok());
    /// assert_eq!(db.keyspace().get("foo"), Some("bar".to_string()));
    /// ```
    pub fn in_memory() -> Self {
        Db::new(Arc::new(Keyspace::new()), None)
    }

    /// Opens the log at `path`, replays it into a fresh keyspace and returns
    /// a database that records further mutations to it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let log = Arc::new(AppendLog::open(path)?);
        let db = Db::new(Arc::new(Keyspace::new()), None);
        db.replay(&log)?;

        Ok(Db { journal: Some(log), ..db })
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    pub fn journal(&self) -> Option<&Arc<dyn Journal>> {
        self.journal.as_ref()
    }

    /// Applies every record of `log` to the keyspace. Nothing is written to
    /// any log and replies are discarded.
    pub fn replay(&self, log: &AppendLog) -> Result<usize, PersistError> {
        let mut store = self.keyspace.write();
        let quiet = Db { keyspace: self.keyspace.clone(), journal: None };

        log.replay(|inv| match Command::parse(&inv) {
            Ok(cmd) if cmd.is_mutating() => {
                if let Value::Error(reason) = quiet.apply(&mut store, &inv, &cmd) {
                    warn!(command = inv.name(), %reason, "replayed record failed");
                }
            }
            Ok(_) => debug!(command = inv.name(), "skipping non-mutating log record"),
            Err(err) => warn!(command = inv.name(), error = %err, "skipping unparseable log record"),
        })
    }

    /// Runs one command on its own. Similarity search reads under the shared
    /// section; everything else takes the exclusive one.
    pub fn execute(&self, inv: &Invocation, cmd: &Command) -> Value {
        match cmd {
            Command::VSearch { query, k } => {
                let store = self.keyspace.read();
                search(&store, query, *k)
            }
            _ => {
                let mut store = self.keyspace.write();
                self.apply(&mut store, inv, cmd)
            }
        }
    }

    /// Runs one command against an already held exclusive section.
    pub fn apply(&self, store: &mut Store, inv: &Invocation, cmd: &Command) -> Value {
        match self.try_apply(store, inv, cmd) {
            Ok(reply) => reply,
            Err(err) => {
                if let CommandError::Persistence(cause) = &err {
                    warn!(command = inv.name(), error = %cause, "rejecting command, log append failed");
                }
                Value::error(err)
            }
        }
    }

    fn try_apply(&self, store: &mut Store, inv: &Invocation, cmd: &Command) -> Result<Value, CommandError> {
        let reply = match cmd {
            Command::Ping { message: None } => Value::Simple("PONG".to_string()),
            Command::Ping { message: Some(message) } => Value::Bulk(message.clone()),
            Command::Echo { message } => Value::Bulk(message.clone()),

            Command::Set { key, value } => {
                self.record(inv)?;
                store.set(key, value.clone());
                Value::ok()
            }
            Command::Get { key } => store.get(key).map_or(Value::Null, Value::Bulk),
            Command::Del { key } => {
                self.record(inv)?;
                Value::Integer(store.delete(key) as i64)
            }
            Command::Expire { key, seconds } => {
                self.record(inv)?;
                Value::Integer(store.expire(key, *seconds) as i64)
            }
            Command::Ttl { key } => Value::Integer(store.ttl(key).as_secs()),

            Command::TSet { key, vector } => {
                self.record(inv)?;
                store.set_vector(key, vector.clone());
                Value::ok()
            }
            Command::TGet { key } => match store.get_vector(key) {
                Some(vector) => Value::Array(
                    vector.iter().map(|&c| Value::Bulk(format_component(c))).collect(),
                ),
                None => Value::Null,
            },
            Command::VSearch { query, k } => search(store, query, *k),

            Command::HSet { key, fields } => {
                require_field_map(store, key)?;
                self.record(inv)?;
                Value::Integer(store.hset(key, fields)? as i64)
            }
            Command::HGet { key, field } => store.hget(key, field)?.map_or(Value::Null, Value::Bulk),
            Command::HDel { key, fields } => {
                require_field_map(store, key)?;
                self.record(inv)?;
                Value::Integer(store.hdel(key, fields)? as i64)
            }
            Command::HGetAll { key } => {
                let fields = store.hgetall(key)?.unwrap_or_default();
                Value::Array(
                    fields
                        .into_iter()
                        .flat_map(|(field, value)| [Value::Bulk(field), Value::Bulk(value)])
                        .collect(),
                )
            }
            Command::HExists { key, field } => Value::Integer(store.hexists(key, field)? as i64),
            Command::HLen { key } => Value::Integer(store.hlen(key)? as i64),

            // Transaction control never reaches the executor inside a session
            Command::Multi => return Err(CommandError::NestedMulti),
            Command::Exec => return Err(CommandError::ExecWithoutMulti),
            Command::Discard => return Err(CommandError::DiscardWithoutMulti),
        };

        Ok(reply)
    }

    fn record(&self, inv: &Invocation) -> Result<(), CommandError> {
        if let Some(journal) = &self.journal {
            journal.append(inv)?;
        }
        Ok(())
    }
}

/// Fails if `key` holds a live entry that is not a field map.
fn require_field_map(store: &mut Store, key: &str) -> Result<(), WrongKind> {
    match store.kind_of(key) {
        Some(kind) if kind != Kind::FieldMap => Err(WrongKind),
        _ => Ok(()),
    }
}

/// Shortest round-trip text for a vector component. Exponents below -4 or
/// from 6 up use scientific notation with a signed, two-digit exponent
/// (`1e+20`, `-1e-05`); everything else is plain decimal.
fn format_component(c: f32) -> String {
    if !c.is_finite() {
        return match c {
            c if c.is_nan() => "NaN".to_string(),
            c if c > 0.0 => "+Inf".to_string(),
            _ => "-Inf".to_string(),
        };
    }

    let scientific = format!("{:e}", c);
    let Some((mantissa, exp)) = scientific.split_once('e') else {
        return c.to_string();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return c.to_string();
    };

    if (-4..6).contains(&exp) {
        c.to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    }
}

fn search(store: &Store, query: &[f32], k: i64) -> Value {
    let top_k = usize::try_from(k).unwrap_or(0);
    let candidates = store.snapshot_vectors();
    Value::Array(
        nearest(&candidates, query, top_k)
            .into_iter()
            .map(|(key, _)| Value::Bulk(key))
            .collect(),
    )
}
