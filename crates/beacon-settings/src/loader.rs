//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If `~/.beacon/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `BEACON_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{BeaconSettings, LogFormat, PubSubBackend};

/// Resolve the path to the settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

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
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value
/// is kept.
pub fn apply_env_overrides(settings: &mut BeaconSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("BEACON_WS_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_u64("BEACON_KEEPALIVE", 0, 3600) {
        settings.server.keep_alive_secs = v;
    }

    // ── Drivers ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_STORAGE") {
        settings.subscriptions.storage = v;
    }
    if let Some(v) = read_env_string("BEACON_CONTEXT") {
        settings.subscriptions.context = v;
    }

    // ── Pub/sub ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_PUBSUB_BACKEND") {
        match parse_backend(&v) {
            Some(backend) => settings.pubsub.backend = backend,
            None => tracing::warn!(key = "BEACON_PUBSUB_BACKEND", value = %v, "unknown backend, ignoring"),
        }
    }
    if let Some(v) = read_env_string("BEACON_PUBSUB_URL") {
        settings.pubsub.url = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_USERINFO_URL") {
        settings.auth.userinfo_url = Some(v);
    }
    if let Some(v) = read_env_string("BEACON_COOKIE_NAME") {
        settings.auth.cookie_name = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("BEACON_LOG_JSON") {
        settings.logging.format = if v { LogFormat::Json } else { LogFormat::Compact };
    }
}

/// Check constraints that serde defaults cannot express.
pub fn validate(settings: &BeaconSettings) -> Result<()> {
    if settings.subscriptions.storage.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "subscriptions.storage must name a driver".into(),
        ));
    }
    if settings.subscriptions.context.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "subscriptions.context must name a driver".into(),
        ));
    }
    if settings.server.outbound_buffer == 0 {
        return Err(SettingsError::InvalidValue(
            "server.outboundBuffer must be at least 1".into(),
        ));
    }
    if settings.pubsub.broadcast_channel == settings.pubsub.events_channel {
        return Err(SettingsError::InvalidValue(format!(
            "pubsub.broadcastChannel and pubsub.eventsChannel are both '{}'",
            settings.pubsub.events_channel
        )));
    }
    Ok(())
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

/// Parse a pub/sub backend name (case-insensitive).
pub fn parse_backend(val: &str) -> Option<PubSubBackend> {
    match val.to_lowercase().as_str() {
        "memory" => Some(PubSubBackend::Memory),
        "redis" => Some(PubSubBackend::Redis),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
