//! Typed errors for the bus, the interpolator, the thread stores and the
//! decision handshake.

use std::path::PathBuf;

use thiserror::Error;

/// A payload rejected by an event's input schema.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    /// Offending field paths, when the schema can name them.
    pub fields: Vec<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            message: message.into(),
            fields,
        }
    }
}

/// Errors returned by `EventBus::publish`.
#[derive(Debug, Error)]
pub enum BusError {
    /// Payload failed schema validation; no handler ran.
    #[error("validation failed for {event}: {source}")]
    Validation {
        event: String,
        #[source]
        source: ValidationError,
    },
}

/// Why a `{path}` reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("unmatched '[' in path '{0}'")]
    UnmatchedBracket(String),

    #[error("invalid array index '{index}' in path '{path}'")]
    InvalidIndex { path: String, index: String },

    #[error("key '{key}' not found in path '{path}'")]
    MissingKey { path: String, key: String },

    #[error("index {index} out of range in path '{path}'")]
    OutOfRange { path: String, index: i64 },
}

/// Thread store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error("thread already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid thread id: {0:?}")]
    InvalidId(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt thread document {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize thread: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures talking to the decision handler during a chain step.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("no handler registered for decision event {0}")]
    NoHandler(String),

    #[error("decision handler failed: {0}")]
    Handler(String),

    #[error("unparseable decision reply: {0}")]
    Malformed(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}
