//! Error types shared across the crate.
//!
//! Each layer has its own enum. `CommandError` renders as the exact text
//! sent back to clients in an error reply.

use std::io;
use thiserror::Error;

/// A request that could not be decoded from the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown type byte: {0:?}")]
    UnknownType(char),

    #[error("invalid length: {0}")]
    InvalidLength(String),

    #[error("missing CRLF after bulk data")]
    MissingTerminator,

    #[error("bulk string is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("arrays nested deeper than {0}")]
    TooDeep(usize),
}

/// Failures of the persistence log.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record in the middle of the log could not be decoded.
    #[error("corrupt log record at offset {offset}: {source}")]
    Corrupt {
        offset: usize,
        #[source]
        source: ProtocolError,
    },
}

/// An invocation rejected before or while touching the keyspace.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR invalid float value")]
    InvalidFloat,

    #[error("ERR invalid K value")]
    InvalidK,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongKind,

    #[error("ERR persistence failure: {0}")]
    Persistence(#[from] PersistError),

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,
}

/// Signal returned by field-map operations on a key of another kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("key holds the wrong kind of value")]
pub struct WrongKind;

impl From<WrongKind> for CommandError {
    fn from(_: WrongKind) -> Self {
        CommandError::WrongKind
    }
}

/// Problems loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
