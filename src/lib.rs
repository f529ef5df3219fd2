//! # KVDB - A Typed Key-Value Store
//!
//! KVDB is an in-memory data store spoken to over a line-oriented binary wire
//! protocol. Keys hold one of three kinds of value: strings, field maps, or
//! fixed-length `f32` vectors. Keys can expire, clients can batch commands
//! into atomic transactions, every mutation is recorded in an append-only
//! log that is replayed on startup, and stored vectors can be searched by
//! cosine distance.
//!
//! ## Layout
//!
//! - [`keyspace`] owns all data behind one reader/writer lock and evicts
//!   expired keys when they are touched.
//! - [`command`] turns wire invocations into typed commands.
//! - [`db`] executes commands, writing each mutation to the log before
//!   applying it.
//! - [`session`] is the per-connection MULTI/EXEC/DISCARD state machine.
//! - [`aof`] is the append-only log and its replay.
//! - [`vector`] holds the distance math and brute-force search.
//! - [`server`] accepts TCP clients, one task per connection.
//!
//! ## Example
//!
//! ```
//! use kvdb::{Db, Invocation, Session, Value};
//!
//! let mut session = Session::new(Db::in_memory());
//! let mut send = |line: &str| session.handle(Invocation::from_line(line).unwrap());
//!
//! send("TSET v 0.1 0.2 0.3");
//! send("TSET v2 0.4 0.5 0.6");
//! let results = send("VSEARCH 0.1 0.2 0.3 1");
//! assert_eq!(results, Value::Array(vec![Value::Bulk("v".to_string())]));
//! ```

pub mod aof;
pub mod clock;
pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod keyspace;
pub mod resp;
pub mod server;
pub mod session;
pub mod vector;

pub use aof::{AppendLog, Journal};
pub use command::Command;
pub use config::Config;
pub use db::Db;
pub use error::{CommandError, ConfigError, PersistError, ProtocolError, WrongKind};
pub use keyspace::{Keyspace, Kind, Payload, Ttl};
pub use resp::{Invocation, Value};
pub use session::Session;
