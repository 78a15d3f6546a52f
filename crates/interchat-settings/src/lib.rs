//! # interchat-settings
//!
//! Configuration for the chat service.
//!
//! Loading order, lowest priority first:
//! 1. Compiled defaults ([`ChatSettings::default()`])
//! 2. An optional JSON settings file, deep-merged over the defaults
//! 3. Environment variable overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path};
pub use types::{
    Backpressure, ChatSettings, LogBackend, LogSettings, LogFormat, RoomSettings, ServerSettings,
    SessionSettings, TelemetrySettings,
};
