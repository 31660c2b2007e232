//! Dead-letter model

use serde::{Deserialize, Serialize};

use super::Operation;

/// Record of an operation removed from the retry path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The operation as it was when dropped (retries included)
    pub operation: Operation,
    /// Last error reported by the remote store
    pub error: String,
    /// Whether the remote rejected it outright rather than exhausting retries
    pub permanent: bool,
    /// Drop timestamp (Unix ms)
    pub dropped_at: i64,
}

impl DeadLetter {
    pub fn new(operation: Operation, error: impl Into<String>, permanent: bool) -> Self {
        Self {
            operation,
            error: error.into(),
            permanent,
            dropped_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
