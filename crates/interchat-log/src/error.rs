//! Durable log errors.

use std::time::Duration;

/// Errors raised by the durable log and its stores.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// The backing store could not be reached.
    #[error("log store unavailable: {0}")]
    Unavailable(String),

    /// The operation exceeded the configured deadline and was abandoned.
    #[error("log {op} timed out after {after:?}")]
    Timeout {
        /// Operation name (`append` or `read`).
        op: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// The store rejected or failed the operation.
    #[error("storage error: {0}")]
    Storage(String),
}

impl LogError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<rusqlite::Error> for LogError {
    fn from(e: rusqlite::Error) -> Self {
        LogError::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for LogError {
    fn from(e: tokio::task::JoinError) -> Self {
        LogError::Unavailable(format!("store task failed: {e}"))
    }
}
