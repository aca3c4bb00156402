//! Credential handling settings.

use serde::{Deserialize, Serialize};

/// Credential capture and token validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Cookie whose value is injected as a bearer credential into the
    /// `connection_init` payload.
    pub cookie_name: String,
    /// Token validation (userinfo) endpoint used by the `oauth` context driver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_url: Option<String>,
    /// Timeout for a single token validation request, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            cookie_name: "beacon_token".to_string(),
            userinfo_url: None,
            timeout_ms: 5_000,
        }
    }
}
