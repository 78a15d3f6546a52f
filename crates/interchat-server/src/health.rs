//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the room accepts events, `"unavailable"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current room members; absent when the room is unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<usize>,
}

impl HealthResponse {
    /// Whether the service is healthy.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Build a health response. `members` is `None` when the room could not be
/// queried.
pub fn health_check(start_time: Instant, members: Option<usize>) -> HealthResponse {
    HealthResponse {
        status: if members.is_some() { "ok" } else { "unavailable" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        members,
    }
}
