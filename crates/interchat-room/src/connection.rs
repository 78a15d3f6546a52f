//! Transport boundary driven by the session loops.
//!
//! The loops apply every deadline themselves with `tokio::time`, so
//! implementations only move frames.

use async_trait::async_trait;
use interchat_core::{ConnectionError, Payload};

/// Close code and reason carried by a close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// RFC 6455 close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseFrame {
    /// Build a close frame.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// One complete transport frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Opaque application payload.
    Data(Payload),
    /// Liveness ping.
    Ping(Payload),
    /// Liveness ping acknowledgement.
    Pong(Payload),
    /// Closing handshake, with an optional code.
    Close(Option<CloseFrame>),
}

/// Write half of a participant connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError>;

    /// Close the underlying transport. Calling it more than once is a no-op.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Read half of a participant connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next complete frame, or `None` once the transport has ended.
    async fn recv(&mut self) -> Option<Result<Frame, ConnectionError>>;
}
