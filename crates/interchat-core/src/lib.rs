//! # interchat-core
//!
//! Types shared by every interchat crate:
//!
//! - [`SessionId`]: identity of one connected participant
//! - [`ConnectionError`] and close-code classification for session loops
//! - [`Failure`] reports and the [`FailureReporter`] observability seam

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod report;

pub use errors::{ConnectionError, close_code};
pub use ids::SessionId;
pub use report::{CollectingReporter, Failure, FailureReporter, TracingReporter};

/// Opaque message payload. The service never interprets message bytes.
pub type Payload = bytes::Bytes;
