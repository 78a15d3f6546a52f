//! One participant connection, split into an inbound and an outbound loop.
//!
//! The inbound loop reads frames and forwards data to the room. The outbound
//! loop drains the session queue to the network and sends liveness pings.
//! Both loops share a lifecycle token: whichever exits first cancels it and
//! the other follows.

use std::time::Duration;

use interchat_core::{ConnectionError, Failure, FailureReporter, Payload, SessionId, close_code};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{CloseFrame, Frame, FrameSink, FrameStream};
use crate::coordinator::Room;

/// Deadlines and limits for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Deadline for a single frame write.
    pub write_wait: Duration,
    /// How long the peer may stay silent before it must answer a ping.
    pub pong_wait: Duration,
    /// Interval between pings. Should be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound data frame accepted, in bytes.
    pub read_limit: usize,
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(10),
            ping_period: Duration::from_secs(5),
            read_limit: 4096,
            queue_capacity: 256,
        }
    }
}

/// A participant before its loops are started.
pub struct Session {
    id: SessionId,
    options: SessionOptions,
    queue: mpsc::Receiver<Payload>,
    lifecycle: CancellationToken,
}

/// The room's side of a session: the producer end of its outbound queue.
///
/// Dropping every handle closes the queue, which ends the outbound loop.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    pub(crate) queue: mpsc::Sender<Payload>,
    lifecycle: CancellationToken,
}

impl SessionHandle {
    /// Build a handle over an existing queue, for consumers that drain the
    /// queue themselves.
    pub fn new(id: SessionId, queue: mpsc::Sender<Payload>, lifecycle: CancellationToken) -> Self {
        Self {
            id,
            queue,
            lifecycle,
        }
    }

    /// Session identity.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// End the session: both loops exit and the connection is closed.
    pub fn cancel(&self) {
        self.lifecycle.cancel();
    }

    /// Whether the session has ended.
    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

impl Session {
    /// Create a session with a fresh id and an empty outbound queue.
    pub fn new(options: SessionOptions) -> (Self, SessionHandle) {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let lifecycle = CancellationToken::new();
        let handle = SessionHandle::new(id.clone(), tx, lifecycle.clone());
        let session = Self {
            id,
            options,
            queue: rx,
            lifecycle,
        };
        (session, handle)
    }

    /// Session identity.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Token cancelled when the session ends.
    pub fn lifecycle(&self) -> CancellationToken {
        self.lifecycle.clone()
    }

    /// Split into the two loops.
    pub fn into_loops(self) -> (InboundLoop, OutboundLoop) {
        let inbound = InboundLoop {
            id: self.id.clone(),
            options: self.options,
            lifecycle: self.lifecycle.clone(),
        };
        let outbound = OutboundLoop {
            id: self.id,
            options: self.options,
            queue: self.queue,
            lifecycle: self.lifecycle,
        };
        (inbound, outbound)
    }
}

/// Why the inbound loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundExit {
    /// The session lifecycle ended.
    Cancelled,
    /// The connection failed, closed or went silent.
    Disconnected(ConnectionError),
    /// The room stopped accepting broadcasts.
    RoomClosed,
}

/// Why the outbound loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundExit {
    /// The queue was closed; a close frame was sent.
    QueueClosed,
    /// The session lifecycle ended.
    Cancelled,
    /// A data or ping write failed or missed its deadline.
    WriteFailed(ConnectionError),
}

/// Reads frames from the peer.
pub struct InboundLoop {
    id: SessionId,
    options: SessionOptions,
    lifecycle: CancellationToken,
}

impl InboundLoop {
    /// Run until the connection ends or the lifecycle is cancelled.
    ///
    /// Data frames go to `room` unmodified. Pongs push the liveness deadline
    /// out by `pong_wait`. Unexpected closures are handed to `reporter`. The
    /// lifecycle is cancelled on every exit.
    pub async fn run<S>(self, stream: &mut S, room: &Room, reporter: &dyn FailureReporter) -> InboundExit
    where
        S: FrameStream + ?Sized,
    {
        let pong_wait = self.options.pong_wait;
        let mut deadline = Instant::now() + pong_wait;

        let exit = loop {
            let next = tokio::select! {
                () = self.lifecycle.cancelled() => break InboundExit::Cancelled,
                next = tokio::time::timeout_at(deadline, stream.recv()) => next,
            };
            let frame = match next {
                Err(_) => break InboundExit::Disconnected(ConnectionError::Timeout(pong_wait)),
                Ok(None) => {
                    break InboundExit::Disconnected(ConnectionError::closed(None, "transport ended"));
                }
                Ok(Some(Err(e))) => break InboundExit::Disconnected(e),
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Frame::Data(payload) => {
                    if payload.len() > self.options.read_limit {
                        break InboundExit::Disconnected(ConnectionError::MessageTooLarge {
                            size: payload.len(),
                            limit: self.options.read_limit,
                        });
                    }
                    if room.broadcast(payload).await.is_err() {
                        break InboundExit::RoomClosed;
                    }
                }
                Frame::Pong(_) => deadline = Instant::now() + pong_wait,
                Frame::Ping(_) => {}
                Frame::Close(close) => {
                    let (code, reason) = close.map_or((None, String::new()), |c| (Some(c.code), c.reason));
                    break InboundExit::Disconnected(ConnectionError::Closed { code, reason });
                }
            }
        };

        if let InboundExit::Disconnected(err) = &exit {
            if err.is_unexpected_closure() {
                if let ConnectionError::Closed { code, reason } = err {
                    reporter.report(Failure::UnexpectedClosure {
                        session_id: self.id.clone(),
                        code: *code,
                        reason: reason.clone(),
                    });
                }
            } else {
                debug!(session_id = %self.id, error = %err, kind = err.error_kind(), "inbound loop ended");
            }
        }
        self.lifecycle.cancel();
        exit
    }
}

/// Writes queued payloads and pings to the peer.
pub struct OutboundLoop {
    id: SessionId,
    options: SessionOptions,
    queue: mpsc::Receiver<Payload>,
    lifecycle: CancellationToken,
}

impl OutboundLoop {
    /// Run until the queue closes, a write fails or the lifecycle is
    /// cancelled. Owns the sink and closes it on every exit.
    pub async fn run<S: FrameSink>(self, mut sink: S) -> OutboundExit {
        let Self {
            id,
            options,
            mut queue,
            lifecycle,
        } = self;
        let write_wait = options.write_wait;
        let mut ticker = tokio::time::interval_at(Instant::now() + options.ping_period, options.ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                () = lifecycle.cancelled() => break OutboundExit::Cancelled,
                item = queue.recv() => match item {
                    Some(payload) => {
                        if let Err(e) = write_frame(&mut sink, Frame::Data(payload), write_wait).await {
                            break OutboundExit::WriteFailed(e);
                        }
                    }
                    None => {
                        let close = Frame::Close(Some(CloseFrame::new(close_code::NORMAL, "")));
                        if let Err(e) = write_frame(&mut sink, close, write_wait).await {
                            debug!(session_id = %id, error = %e, "close frame not delivered");
                        }
                        break OutboundExit::QueueClosed;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = write_frame(&mut sink, Frame::Ping(Payload::new()), write_wait).await {
                        break OutboundExit::WriteFailed(e);
                    }
                }
            }
        };
        drop(ticker);

        if let OutboundExit::WriteFailed(e) = &exit {
            warn!(session_id = %id, error = %e, kind = e.error_kind(), "write failed, disconnecting");
        }
        lifecycle.cancel();
        match tokio::time::timeout(write_wait, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session_id = %id, error = %e, "close failed"),
            Err(_) => debug!(session_id = %id, "close timed out"),
        }
        exit
    }
}

async fn write_frame<S: FrameSink>(sink: &mut S, frame: Frame, wait: Duration) -> Result<(), ConnectionError> {
    match tokio::time::timeout(wait, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout(wait)),
    }
}
