//! # interchat-room
//!
//! One chat room and the participants connected to it.
//!
//! - [`RoomCoordinator`]: serialized event loop owning membership and the
//!   room's [`DurableLog`](interchat_log::DurableLog)
//! - [`Room`]: cloneable handle used to join, leave and broadcast
//! - [`Session`]: one participant; split into an inbound and an outbound loop
//! - [`FrameSink`] / [`FrameStream`]: the transport boundary the loops drive

#![deny(unsafe_code)]

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod session;

pub use connection::{CloseFrame, Frame, FrameSink, FrameStream};
pub use coordinator::{BackpressurePolicy, Room, RoomCoordinator, RoomOptions};
pub use error::RoomError;
pub use session::{
    InboundExit, InboundLoop, OutboundExit, OutboundLoop, Session, SessionHandle, SessionOptions,
};
