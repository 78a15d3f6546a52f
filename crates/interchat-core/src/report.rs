//! Failure reports handed to the observability collaborator.
//!
//! Only genuine failures are reported: unexpected connection closures and
//! log failures. Expected closures never reach a [`FailureReporter`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::ids::SessionId;

/// A structured failure report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// A participant connection closed with an unexpected close code.
    UnexpectedClosure {
        /// Session whose connection closed.
        session_id: SessionId,
        /// Close code, if any.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// A broadcast could not be appended to the durable log and was dropped.
    PublishFailed {
        /// Room the broadcast was addressed to.
        room: String,
        /// Rendered log error.
        error: String,
    },
    /// History for a joining session could not be read; the join was refused.
    HistoryReadFailed {
        /// Room being joined.
        room: String,
        /// Session that was refused.
        session_id: SessionId,
        /// Rendered log error.
        error: String,
    },
}

impl Failure {
    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnexpectedClosure { .. } => "unexpected_closure",
            Self::PublishFailed { .. } => "publish_failed",
            Self::HistoryReadFailed { .. } => "history_read_failed",
        }
    }
}

/// Receives failure reports. Implementations must be cheap and non-blocking:
/// they are called from inside the room event loop.
pub trait FailureReporter: Send + Sync {
    /// Record one failure.
    fn report(&self, failure: Failure);
}

/// Reporter that emits every failure as an `ERROR` tracing event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report(&self, failure: Failure) {
        let kind = failure.kind();
        match failure {
            Failure::UnexpectedClosure {
                session_id,
                code,
                reason,
            } => {
                error!(kind, %session_id, ?code, %reason, "unexpected connection closure");
            }
            Failure::PublishFailed { room, error } => {
                error!(kind, %room, %error, "failed to publish message");
            }
            Failure::HistoryReadFailed {
                room,
                session_id,
                error,
            } => {
                error!(kind, %room, %session_id, %error, "failed to read room history");
            }
        }
    }
}

/// Reporter that keeps every failure in memory. Useful in tests and for
/// wiring assertions.
#[derive(Clone, Debug, Default)]
pub struct CollectingReporter {
    failures: Arc<Mutex<Vec<Failure>>>,
}

impl CollectingReporter {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every failure reported so far.
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }

    /// Number of failures reported so far.
    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    /// Whether nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }
}

impl FailureReporter for CollectingReporter {
    fn report(&self, failure: Failure) {
        self.failures.lock().push(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_reporter_records_in_order() {
        let reporter = CollectingReporter::new();
        assert!(reporter.is_empty());

        reporter.report(Failure::PublishFailed {
            room: "public".into(),
            error: "timeout".into(),
        });
        reporter.report(Failure::UnexpectedClosure {
            session_id: SessionId::from_raw("sess_1"),
            code: Some(1002),
            reason: String::new(),
        });

        let failures = reporter.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].kind(), "publish_failed");
        assert_eq!(failures[1].kind(), "unexpected_closure");
    }

    #[test]
    fn clones_share_storage() {
        let reporter = CollectingReporter::new();
        let clone = reporter.clone();
        clone.report(Failure::HistoryReadFailed {
            room: "public".into(),
            session_id: SessionId::new(),
            error: "unavailable".into(),
        });
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn tracing_reporter_does_not_panic_without_subscriber() {
        TracingReporter.report(Failure::PublishFailed {
            room: "public".into(),
            error: "boom".into(),
        });
    }
}
