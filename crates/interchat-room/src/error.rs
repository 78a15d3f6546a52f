//! Room operation errors.

use std::time::Duration;

use interchat_log::LogError;

/// Errors raised by room operations. Each is scoped to one join or one
/// broadcast.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// History could not be read for a joining session; it was not admitted.
    #[error("history replay failed: {0}")]
    HistoryReplay(LogError),

    /// The payload could not be persisted and was not delivered.
    #[error("publish failed: {0}")]
    Publish(LogError),

    /// The session's outbound queue is closed.
    #[error("session queue closed")]
    QueueClosed,

    /// The session's outbound queue stayed full past the slow-member bound.
    #[error("session queue stayed full for {0:?}")]
    SlowMember(Duration),

    /// The coordinator loop is no longer running.
    #[error("room is closed")]
    Closed,
}

impl RoomError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::HistoryReplay(_) => "history_replay",
            Self::Publish(_) => "publish",
            Self::QueueClosed => "queue_closed",
            Self::SlowMember(_) => "slow_member",
            Self::Closed => "room_closed",
        }
    }
}
