//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{Backpressure, ChatSettings, LogBackend, LogFormat};

/// Load settings from an optional file, then apply process environment
/// overrides and validate.
pub fn load_settings(path: Option<&Path>) -> Result<ChatSettings> {
    let mut settings = match path {
        Some(path) => load_settings_from_path(path)?,
        None => ChatSettings::default(),
    };
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Load settings from a JSON file deep-merged over the defaults.
///
/// A missing file yields the defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ChatSettings> {
    let defaults = serde_json::to_value(ChatSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// `lookup` maps a variable name to its value; the process environment is
/// passed in production and a map in tests. Invalid values are ignored with
/// a warning and the file/default value is kept.
pub fn apply_overrides<F>(settings: &mut ChatSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WS_HTTP_ADDRESS") {
        settings.server.address = v;
    }
    if let Some(v) = env.string("INTERCHAT_ADDRESS") {
        settings.server.address = v;
    }
    if let Some(v) = env.usize("INTERCHAT_MAX_MESSAGE_SIZE", 128, 16 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }

    // ── Room ────────────────────────────────────────────────────────
    if let Some(v) = env.string("INTERCHAT_ROOM_NAME") {
        settings.room.name = v;
    }
    if let Some(v) = env.usize("INTERCHAT_HISTORY_CAPACITY", 1, 10_000) {
        settings.room.history_capacity = v;
    }
    if let Some(v) = env.usize("INTERCHAT_EVENT_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.room.event_queue_capacity = v;
    }
    if let Some(v) = env.string("INTERCHAT_BACKPRESSURE") {
        match parse_backpressure(&v) {
            Some(b) => settings.room.backpressure = b,
            None => warn!(key = "INTERCHAT_BACKPRESSURE", value = %v, "invalid backpressure policy, ignoring"),
        }
    }
    if let Some(v) = env.u64("INTERCHAT_SLOW_MEMBER_TIMEOUT_MS", 1, 600_000) {
        settings.room.slow_member_timeout_ms = v;
    }

    // ── Log ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("INTERCHAT_LOG_BACKEND") {
        match v.to_lowercase().as_str() {
            "sqlite" => settings.log.backend = LogBackend::Sqlite,
            "memory" => settings.log.backend = LogBackend::Memory,
            _ => warn!(key = "INTERCHAT_LOG_BACKEND", value = %v, "invalid log backend, ignoring"),
        }
    }
    if let Some(v) = env.string("INTERCHAT_LOG_PATH") {
        settings.log.path = v;
    }
    if let Some(v) = env.usize("INTERCHAT_LOG_MAX_LEN", 1, 10_000_000) {
        settings.log.max_len = v;
    }
    if let Some(v) = env.bool("INTERCHAT_LOG_APPROXIMATE") {
        settings.log.approximate = v;
    }
    if let Some(v) = env.u64("INTERCHAT_LOG_TIMEOUT_MS", 1, 600_000) {
        settings.log.operation_timeout_ms = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.u64("INTERCHAT_WRITE_WAIT_MS", 1, 600_000) {
        settings.session.write_wait_ms = v;
    }
    if let Some(v) = env.u64("INTERCHAT_PONG_WAIT_MS", 1, 600_000) {
        settings.session.pong_wait_ms = v;
    }
    if let Some(v) = env.u64("INTERCHAT_PING_PERIOD_MS", 1, 600_000) {
        settings.session.ping_period_ms = v;
    }
    if let Some(v) = env.usize("INTERCHAT_READ_LIMIT", 1, 16 * 1024 * 1024) {
        settings.session.read_limit = v;
    }
    if let Some(v) = env.usize("INTERCHAT_SEND_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.session.queue_capacity = v;
    }

    // ── Telemetry ───────────────────────────────────────────────────
    if let Some(v) = env.string("INTERCHAT_LOG_LEVEL") {
        settings.telemetry.level = v;
    }
    if let Some(v) = env.string("INTERCHAT_LOG_FORMAT") {
        match v.to_lowercase().as_str() {
            "json" => settings.telemetry.format = LogFormat::Json,
            "pretty" => settings.telemetry.format = LogFormat::Pretty,
            _ => warn!(key = "INTERCHAT_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a backpressure policy name.
pub fn parse_backpressure(val: &str) -> Option<Backpressure> {
    match val.to_lowercase().as_str() {
        "block" => Some(Backpressure::Block),
        "disconnect" => Some(Backpressure::Disconnect),
        _ => None,
    }
}

// ── Env readers (thin wrappers) ─────────────────────────────────────────────

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.string(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"room": {"name": "public", "historyCapacity": 50}});
        let source = serde_json::json!({"room": {"historyCapacity": 20}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["room"]["historyCapacity"], 20);
        assert_eq!(merged["room"]["name"], "public");
    }

    #[test]
    fn merge_skips_null() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let target = serde_json::json!({"a": [1, 2, 3]});
        let source = serde_json::json!({"a": [9]});
        assert_eq!(deep_merge(target, source)["a"], serde_json::json!([9]));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.room.history_capacity, 50);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"log": {{"maxLen": 500, "approximate": true}}, "session": {{"readLimit": 1024}}}}"#
        )
        .unwrap();
        let s = load_settings_from_path(file.path()).unwrap();
        assert_eq!(s.log.max_len, 500);
        assert!(s.log.approximate);
        assert_eq!(s.session.read_limit, 1024);
        assert_eq!(s.session.queue_capacity, 256);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn legacy_address_variable_is_honoured() {
        let mut s = ChatSettings::default();
        apply_overrides(&mut s, env(&[("WS_HTTP_ADDRESS", "0.0.0.0:9000")]));
        assert_eq!(s.server.address, "0.0.0.0:9000");
    }

    #[test]
    fn interchat_address_wins_over_legacy() {
        let mut s = ChatSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("WS_HTTP_ADDRESS", "0.0.0.0:9000"),
                ("INTERCHAT_ADDRESS", "0.0.0.0:9001"),
            ]),
        );
        assert_eq!(s.server.address, "0.0.0.0:9001");
    }

    #[test]
    fn numeric_overrides_apply() {
        let mut s = ChatSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("INTERCHAT_HISTORY_CAPACITY", "25"),
                ("INTERCHAT_LOG_MAX_LEN", "1000"),
                ("INTERCHAT_PING_PERIOD_MS", "2500"),
                ("INTERCHAT_LOG_APPROXIMATE", "yes"),
                ("INTERCHAT_BACKPRESSURE", "BLOCK"),
                ("INTERCHAT_LOG_BACKEND", "memory"),
            ]),
        );
        assert_eq!(s.room.history_capacity, 25);
        assert_eq!(s.log.max_len, 1000);
        assert_eq!(s.session.ping_period_ms, 2500);
        assert!(s.log.approximate);
        assert_eq!(s.room.backpressure, Backpressure::Block);
        assert_eq!(s.log.backend, LogBackend::Memory);
    }

    #[test]
    fn invalid_values_are_ignored() {
        let mut s = ChatSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("INTERCHAT_HISTORY_CAPACITY", "0"),
                ("INTERCHAT_LOG_MAX_LEN", "lots"),
                ("INTERCHAT_LOG_APPROXIMATE", "maybe"),
                ("INTERCHAT_BACKPRESSURE", "drop"),
                ("INTERCHAT_LOG_FORMAT", "xml"),
            ]),
        );
        assert_eq!(s.room.history_capacity, 50);
        assert_eq!(s.log.max_len, 100);
        assert!(!s.log.approximate);
        assert_eq!(s.room.backpressure, Backpressure::Disconnect);
        assert_eq!(s.telemetry.format, LogFormat::Json);
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut s = ChatSettings::default();
        apply_overrides(&mut s, env(&[("INTERCHAT_ROOM_NAME", "")]));
        assert_eq!(s.room.name, "public");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("10", 1, 100), Some(10));
        assert_eq!(parse_u64_range("101", 1, 100), None);
        assert_eq!(parse_usize_range("-1", 0, 100), None);
    }
}
