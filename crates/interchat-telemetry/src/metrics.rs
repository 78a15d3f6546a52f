//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `GET /metrics`. Call once at startup
/// before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across crates.

/// Accepted WebSocket connections (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Closed WebSocket connections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Currently open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Current room members (gauge).
pub const ROOM_MEMBERS: &str = "room_members";
/// Joins refused because history could not be replayed (counter).
pub const ROOM_JOIN_FAILURES_TOTAL: &str = "room_join_failures_total";
/// Broadcasts persisted and fanned out (counter).
pub const ROOM_BROADCASTS_TOTAL: &str = "room_broadcasts_total";
/// Broadcasts dropped because the log append failed (counter).
pub const ROOM_PUBLISH_FAILURES_TOTAL: &str = "room_publish_failures_total";
/// Members disconnected for not draining their queue (counter).
pub const ROOM_SLOW_MEMBER_DROPS_TOTAL: &str = "room_slow_member_drops_total";
/// Durable log operation latency in seconds (histogram, labels: op).
pub const LOG_OPERATION_DURATION_SECONDS: &str = "log_operation_duration_seconds";
/// Durable log operations that timed out (counter, labels: op).
pub const LOG_TIMEOUTS_TOTAL: &str = "log_timeouts_total";
