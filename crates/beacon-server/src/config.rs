//! Server configuration.

use beacon_settings::BeaconSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the Beacon HTTP/WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
    /// Cookie carrying the client credential.
    pub cookie_name: String,
    /// Keep-alive interval in seconds (0 disables).
    pub keep_alive_secs: u64,
}

impl ServerConfig {
    /// Listener configuration from loaded settings.
    pub fn from_settings(settings: &BeaconSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            outbound_buffer: settings.server.outbound_buffer,
            cookie_name: settings.auth.cookie_name.clone(),
            keep_alive_secs: settings.server.keep_alive_secs,
        }
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 1024 * 1024,
            outbound_buffer: 256,
            cookie_name: "beacon_token".into(),
            keep_alive_secs: 0,
        }
    }
}
