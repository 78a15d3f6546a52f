//! Connection-level errors and close-code classification.

use std::time::Duration;

/// WebSocket close codes (RFC 6455 §7.4.1) used by the session loops.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint is going away (page navigation, server restart).
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error.
    pub const PROTOCOL: u16 = 1002;
    /// No status code was present in the close frame.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Message exceeded the configured size limit.
    pub const TOO_BIG: u16 = 1009;
    /// Server-side failure.
    pub const INTERNAL: u16 = 1011;
    /// Try again later.
    pub const AGAIN: u16 = 1013;
}

/// Errors raised by a participant connection.
///
/// Every variant is scoped to the one session that produced it. None of them
/// is fatal to the process.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The peer closed the connection, with an optional close code.
    #[error("connection closed (code {code:?}): {reason}")]
    Closed {
        /// Close code sent by the peer, if any.
        code: Option<u16>,
        /// Close reason sent by the peer.
        reason: String,
    },
    /// A read or write did not finish before its deadline.
    #[error("connection deadline of {0:?} elapsed")]
    Timeout(Duration),
    /// The peer sent a message larger than the read limit.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Size of the offending message.
        size: usize,
        /// Configured read limit.
        limit: usize,
    },
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Build a [`ConnectionError::Closed`].
    pub fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Closed {
            code,
            reason: reason.into(),
        }
    }

    /// Whether this error is a closure the peer initiated for a benign
    /// reason.
    ///
    /// Normal, going-away, abnormal and missing-status closures are expected.
    /// Any other close code is unexpected and gets reported. Non-closure
    /// errors are never unexpected closures.
    pub fn is_unexpected_closure(&self) -> bool {
        match self {
            Self::Closed { code, .. } => !matches!(
                code,
                None | Some(
                    close_code::NORMAL
                        | close_code::GOING_AWAY
                        | close_code::NO_STATUS
                        | close_code::ABNORMAL
                )
            ),
            _ => false,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Closed { .. } => "closed",
            Self::Timeout(_) => "timeout",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::Transport(_) => "transport",
        }
    }
}
