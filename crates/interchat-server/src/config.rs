//! Listener configuration and the settings-to-options glue.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use interchat_core::FailureReporter;
use interchat_log::{DurableLog, LogError, LogOptions, LogStore, MemoryLogStore, SqliteLogStore};
use interchat_room::{BackpressurePolicy, Room, RoomCoordinator, RoomOptions, SessionOptions};
use interchat_settings::{
    Backpressure, ChatSettings, LogBackend, LogSettings, RoomSettings, SessionSettings,
};
use tokio::task::JoinHandle;
use tracing::info;

/// Configuration for the listener.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Socket address to bind. Port `0` picks a free port.
    pub address: String,
    /// Largest WebSocket message the upgrade layer accepts, in bytes.
    pub max_message_size: usize,
    /// Options every accepted session is built with.
    pub session: SessionOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:0".into(),
            max_message_size: 64 * 1024,
            session: SessionOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            address: settings.server.address.clone(),
            max_message_size: settings.server.max_message_size,
            session: session_options(&settings.session),
        }
    }
}

/// Session deadlines and limits.
pub fn session_options(s: &SessionSettings) -> SessionOptions {
    SessionOptions {
        write_wait: Duration::from_millis(s.write_wait_ms),
        pong_wait: Duration::from_millis(s.pong_wait_ms),
        ping_period: Duration::from_millis(s.ping_period_ms),
        read_limit: s.read_limit,
        queue_capacity: s.queue_capacity,
    }
}

/// Room options.
pub fn room_options(s: &RoomSettings) -> RoomOptions {
    let backpressure = match s.backpressure {
        Backpressure::Block => BackpressurePolicy::Block,
        Backpressure::Disconnect => BackpressurePolicy::Disconnect {
            after: Duration::from_millis(s.slow_member_timeout_ms),
        },
    };
    RoomOptions {
        name: s.name.clone(),
        history_capacity: s.history_capacity,
        event_queue_capacity: s.event_queue_capacity,
        backpressure,
    }
}

/// Durable log bounds.
pub fn log_options(s: &LogSettings) -> LogOptions {
    LogOptions {
        max_len: s.max_len,
        approximate: s.approximate,
        operation_timeout: Duration::from_millis(s.operation_timeout_ms),
    }
}

/// Open the configured backing store.
pub fn open_store(s: &LogSettings) -> Result<Arc<dyn LogStore>, LogError> {
    match s.backend {
        LogBackend::Sqlite => Ok(Arc::new(SqliteLogStore::open(Path::new(&s.path))?)),
        LogBackend::Memory => Ok(Arc::new(MemoryLogStore::new())),
    }
}

/// Open the store, bind the room's log and start its coordinator.
pub fn start_room(
    settings: &ChatSettings,
    reporter: Arc<dyn FailureReporter>,
) -> Result<(Room, JoinHandle<()>), LogError> {
    let store = open_store(&settings.log)?;
    let log = DurableLog::new(
        settings.room.name.as_str(),
        store,
        log_options(&settings.log),
    );
    info!(
        room = %settings.room.name,
        backend = ?settings.log.backend,
        max_len = settings.log.max_len,
        "starting room"
    );
    Ok(RoomCoordinator::spawn(
        log,
        room_options(&settings.room),
        reporter,
    ))
}
