//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. Every struct is `#[serde(default)]`
//! so a settings file only needs the keys it overrides.

mod auth;
mod pubsub;
mod server;

pub use auth::*;
pub use pubsub::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000, "keepAliveSecs": 10 },
///   "subscriptions": { "storage": "memory", "context": "oauth" },
///   "pubsub": { "backend": "redis", "url": "redis://127.0.0.1:6379" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Registry and context driver selection.
    pub subscriptions: SubscriptionSettings,
    /// Shared broadcast channel settings.
    pub pubsub: PubSubSettings,
    /// Credential handling for the handshake and the `oauth` context driver.
    pub auth: AuthSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable compact lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
