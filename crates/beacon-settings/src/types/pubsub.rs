//! Shared broadcast channel settings.

use serde::{Deserialize, Serialize};

/// Pub/sub backend carrying events and keep-alives between processes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PubSubBackend {
    /// In-process channel; only reaches connections of this process.
    #[default]
    Memory,
    /// Redis `PUBLISH`/`SUBSCRIBE`.
    Redis,
}

/// Pub/sub settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PubSubSettings {
    /// Backend selection.
    pub backend: PubSubBackend,
    /// Backend URL (ignored by the memory backend).
    pub url: String,
    /// Channel carrying keep-alives and JSON control messages.
    pub broadcast_channel: String,
    /// Channel carrying topic event envelopes.
    pub events_channel: String,
    /// Upper bound for the bridge reconnect backoff, in milliseconds.
    pub max_reconnect_delay_ms: u64,
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            backend: PubSubBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            broadcast_channel: "beacon.broadcast".to_string(),
            events_channel: "beacon.events".to_string(),
            max_reconnect_delay_ms: 30_000,
        }
    }
}
