//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a settings file only needs the
//! keys it overrides. Keys are camelCase on disk.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Room coordinator settings.
    pub room: RoomSettings,
    /// Durable log settings.
    pub log: LogSettings,
    /// Per-participant session settings.
    pub session: SessionSettings,
    /// Logging output settings.
    pub telemetry: TelemetrySettings,
}

impl ChatSettings {
    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.room.history_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "room.historyCapacity must be greater than 0".into(),
            ));
        }
        if self.room.event_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "room.eventQueueCapacity must be greater than 0".into(),
            ));
        }
        if self.log.max_len == 0 {
            return Err(SettingsError::InvalidValue(
                "log.maxLen must be greater than 0".into(),
            ));
        }
        if self.session.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "session.queueCapacity must be greater than 0".into(),
            ));
        }
        if self.session.ping_period_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "session.pingPeriodMs must be greater than 0".into(),
            ));
        }
        for (value, key) in [
            (self.session.write_wait_ms, "session.writeWaitMs"),
            (self.session.pong_wait_ms, "session.pongWaitMs"),
            (self.log.operation_timeout_ms, "log.operationTimeoutMs"),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "{key} must be greater than 0"
                )));
            }
        }
        if self.log.backend == LogBackend::Sqlite && self.log.path.is_empty() {
            return Err(SettingsError::InvalidValue(
                "log.path is required for the sqlite backend".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Socket address to bind, e.g. `0.0.0.0:8080`.
    pub address: String,
    /// Largest WebSocket message the upgrade layer accepts, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            max_message_size: 64 * 1024,
        }
    }
}

/// What the room does when a member's outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait for the member's queue, however long it takes. One stuck member
    /// stalls the whole room.
    Block,
    /// Wait up to `slowMemberTimeoutMs`, then disconnect the member.
    #[default]
    Disconnect,
}

/// Room coordinator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    /// Room name; also the durable log name.
    pub name: String,
    /// Number of past messages replayed to a joining participant.
    pub history_capacity: usize,
    /// Capacity of the coordinator's event queue.
    pub event_queue_capacity: usize,
    /// Slow member handling.
    pub backpressure: Backpressure,
    /// Bound on a single delivery when `backpressure` is `disconnect`.
    pub slow_member_timeout_ms: u64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            name: "public".to_string(),
            history_capacity: 50,
            event_queue_capacity: 1024,
            backpressure: Backpressure::Disconnect,
            slow_member_timeout_ms: 1_000,
        }
    }
}

/// Durable log backing store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    /// SQLite database at `log.path`.
    #[default]
    Sqlite,
    /// In-process memory; history is lost on restart.
    Memory,
}

/// Durable log settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogSettings {
    /// Backing store.
    pub backend: LogBackend,
    /// Database path for the sqlite backend.
    pub path: String,
    /// Maximum retained entries.
    pub max_len: usize,
    /// Trim approximately (cheaper, may briefly exceed `max_len`).
    pub approximate: bool,
    /// Deadline applied to every log operation, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            backend: LogBackend::Sqlite,
            path: "interchat.db".to_string(),
            max_len: 100,
            approximate: false,
            operation_timeout_ms: 5_000,
        }
    }
}

/// Per-participant session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Deadline for a single frame write, in milliseconds.
    pub write_wait_ms: u64,
    /// How long to wait for a pong before dropping the peer, in milliseconds.
    pub pong_wait_ms: u64,
    /// Interval between pings, in milliseconds.
    pub ping_period_ms: u64,
    /// Largest inbound message accepted, in bytes.
    pub read_limit: usize,
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            write_wait_ms: 10_000,
            pong_wait_ms: 10_000,
            ping_period_ms: 5_000,
            read_limit: 4096,
            queue_capacity: 256,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default level filter; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behavior() {
        let s = ChatSettings::default();
        assert_eq!(s.room.name, "public");
        assert_eq!(s.room.history_capacity, 50);
        assert_eq!(s.log.max_len, 100);
        assert!(!s.log.approximate);
        assert_eq!(s.log.operation_timeout_ms, 5_000);
        assert_eq!(s.session.write_wait_ms, 10_000);
        assert_eq!(s.session.pong_wait_ms, 10_000);
        assert_eq!(s.session.ping_period_ms, 5_000);
        assert_eq!(s.session.read_limit, 4096);
        assert_eq!(s.session.queue_capacity, 256);
    }

    #[test]
    fn defaults_are_valid() {
        ChatSettings::default().validate().unwrap();
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(ChatSettings::default()).unwrap();
        assert!(json["room"]["historyCapacity"].is_number());
        assert!(json["session"]["pongWaitMs"].is_number());
        assert_eq!(json["room"]["backpressure"], "disconnect");
        assert_eq!(json["log"]["backend"], "sqlite");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: ChatSettings =
            serde_json::from_str(r#"{"room":{"historyCapacity":10}}"#).unwrap();
        assert_eq!(s.room.history_capacity, 10);
        assert_eq!(s.room.name, "public");
        assert_eq!(s.log.max_len, 100);
    }

    #[test]
    fn zero_history_capacity_is_invalid() {
        let mut s = ChatSettings::default();
        s.room.history_capacity = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("historyCapacity"));
    }

    #[test]
    fn zero_deadlines_are_invalid() {
        let mut s = ChatSettings::default();
        s.session.write_wait_ms = 0;
        assert!(s.validate().unwrap_err().to_string().contains("writeWaitMs"));

        let mut s = ChatSettings::default();
        s.session.pong_wait_ms = 0;
        assert!(s.validate().unwrap_err().to_string().contains("pongWaitMs"));

        let mut s = ChatSettings::default();
        s.log.operation_timeout_ms = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("operationTimeoutMs"));
    }

    #[test]
    fn zero_deadline_in_file_is_rejected() {
        let s: ChatSettings =
            serde_json::from_str(r#"{"session":{"writeWaitMs":0}}"#).unwrap();
        assert!(s.validate().is_err());
    }

    #[test]
    fn sqlite_backend_needs_path() {
        let mut s = ChatSettings::default();
        s.log.path.clear();
        assert!(s.validate().is_err());
        s.log.backend = LogBackend::Memory;
        assert!(s.validate().is_ok());
    }
}
