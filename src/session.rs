//! Per-connection transaction state.
//!
//! A session is either idle, running each invocation as it arrives, or
//! queuing after MULTI. EXEC runs the whole queue under a single acquisition
//! of the keyspace's exclusive section, so no other connection can observe
//! part of a batch. Nothing is isolated while queuing: other connections keep
//! reading and writing until the batch commits.

use crate::command::Command;
use crate::db::Db;
use crate::error::CommandError;
use crate::resp::{Invocation, Value};
use tracing::debug;

pub struct Session {
    db: Db,
    /// `Some` while queuing.
    queue: Option<Vec<Invocation>>,
}

impl Session {
    pub fn new(db: Db) -> Self {
        Session { db, queue: None }
    }

    pub fn in_transaction(&self) -> bool {
        self.queue.is_some()
    }

    /// Number of invocations waiting for EXEC.
    pub fn queued(&self) -> usize {
        self.queue.as_ref().map_or(0, Vec::len)
    }

    /// Handles one invocation and returns its reply.
    pub fn handle(&mut self, inv: Invocation) -> Value {
        if !Command::is_control(&inv) {
            if let Some(queue) = &mut self.queue {
                queue.push(inv);
                return Value::Simple("QUEUED".to_string());
            }
        }

        match Command::parse(&inv) {
            Ok(Command::Multi) => self.multi(),
            Ok(Command::Exec) => self.exec(),
            Ok(Command::Discard) => self.discard(),
            Ok(cmd) => self.db.execute(&inv, &cmd),
            Err(err) => Value::error(err),
        }
    }

    fn multi(&mut self) -> Value {
        if self.queue.is_some() {
            return Value::error(CommandError::NestedMulti);
        }
        self.queue = Some(Vec::new());
        Value::ok()
    }

    fn discard(&mut self) -> Value {
        match self.queue.take() {
            Some(queue) => {
                debug!(discarded = queue.len(), "transaction discarded");
                Value::ok()
            }
            None => Value::error(CommandError::DiscardWithoutMulti),
        }
    }

    fn exec(&mut self) -> Value {
        let Some(queue) = self.queue.take() else {
            return Value::error(CommandError::ExecWithoutMulti);
        };

        let mut store = self.db.keyspace().write();
        let replies: Vec<Value> = queue
            .iter()
            .map(|inv| match Command::parse(inv) {
                Ok(cmd) => self.db.apply(&mut store, inv, &cmd),
                Err(err) => Value::error(err),
            })
            .collect();
        drop(store);

        debug!(commands = replies.len(), "transaction committed");
        Value::Array(replies)
    }
}
