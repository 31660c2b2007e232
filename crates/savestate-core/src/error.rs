//! Error types for savestate-core

use thiserror::Error;

/// Result type alias using savestate-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in savestate-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable storage rejected a queue or snapshot write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Remote store error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A merge result would have moved `last_modified` backwards
    #[error("Stale snapshot: last_modified {incoming} is behind {current}")]
    StaleSnapshot { current: i64, incoming: i64 },

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures reported by the remote document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network unreachable or the store temporarily refused the write.
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// Schema/validation rejection; retrying will not help.
    #[error("Permanent remote error: {0}")]
    Permanent(String),
}

impl RemoteError {
    /// Whether the failed call is worth retrying.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
