//! Error types shared by the windowing, event-time and checkpoint modules.

use crate::types::ConnectionId;

/// Errors raised by the core engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A watermark arrived from a connection the receiver was not set up for.
    #[error("watermark from unknown source ({connection}) on input port {port}")]
    InvalidWatermarkSource {
        /// Connection reconstructed from the punctuation payload.
        connection: ConnectionId,
        /// Local input port the punctuation arrived on.
        port: u32,
    },

    /// Malformed punctuation, attribute type mismatch or out-of-range argument.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A checkpoint buffer was not present in the store.
    #[error("key not found: {key}")]
    NotFound {
        /// Store key that was looked up.
        key: String,
    },

    /// Storage backend I/O failure.
    #[error("storage error on key {key}: {source}")]
    Storage {
        /// Store key being accessed.
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A transient storage operation kept failing.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// What was being attempted.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Message of the last observed error.
        last_error: String,
    },

    /// Checkpoint bytes do not decode to what the reader expects.
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    /// Typed value (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Operation not permitted in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The hosting processing element is shutting down.
    #[error("runtime is shutting down")]
    Shutdown,

    /// Configuration could not be parsed or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn illegal(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptCheckpoint(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Transient errors are worth retrying against the store.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
