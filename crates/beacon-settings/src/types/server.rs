//! Listener, connection, and subscription driver settings.

use serde::{Deserialize, Serialize};

/// WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port the WebSocket server listens on.
    pub port: u16,
    /// Keep-alive publish interval in seconds (0 disables).
    pub keep_alive_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            keep_alive_secs: 0,
            max_message_size: 1024 * 1024,
            outbound_buffer: 256,
        }
    }
}

/// Registry and context driver selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionSettings {
    /// Registry storage driver name.
    pub storage: String,
    /// Context driver name.
    pub context: String,
    /// Topics bound to the pass-through topic handler at startup.
    pub topics: Vec<String>,
    /// URI of the reconstructed pseudo-request handed to resolvers.
    pub route: String,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            storage: "memory".to_string(),
            context: "subscriber".to_string(),
            topics: Vec::new(),
            route: "/graphql".to_string(),
        }
    }
}
