//! Wire frames exchanged over the WebSocket.
//!
//! Frames are JSON objects tagged by `type`. Client frames that fail to
//! decode (unknown `type`, non-JSON text) are not an error at this layer:
//! [`ClientFrame::decode`] returns `None` and the caller closes the socket.

use std::sync::Arc;

use beacon_core::RegistrationId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{GraphQLError, SubscriptionError};

/// Sub-protocols accepted during the upgrade, in preference order.
pub const SUPPORTED_PROTOCOLS: [&str; 2] = ["graphql-ws", "graphql-subscriptions"];

/// Registration id as sent by the client: a string or a number.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FrameId {
    /// String id.
    Text(String),
    /// Numeric id, stringified on conversion.
    Number(serde_json::Number),
}

impl From<FrameId> for RegistrationId {
    fn from(id: FrameId) -> Self {
        match id {
            FrameId::Text(s) => RegistrationId::from(s),
            FrameId::Number(n) => RegistrationId::from(n.to_string()),
        }
    }
}

/// Frames a client may send.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake; `payload` is captured as the connection's init.
    ConnectionInit {
        /// Init payload (should be an object).
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Register a subscription.
    Start {
        /// Client-chosen registration id.
        #[serde(default)]
        id: Option<FrameId>,
        /// Raw `start` payload, parsed by [`StartPayload::parse`].
        #[serde(default)]
        payload: Value,
    },
    /// Unregister a subscription.
    Stop {
        /// Registration id to drop.
        id: FrameId,
    },
}

impl ClientFrame {
    /// Decode a text frame. `None` means "close the connection".
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Parsed `start` payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StartPayload {
    /// GraphQL subscription document.
    pub query: String,
    /// Variables (empty when absent or `null`).
    pub variables: Map<String, Value>,
    /// Selected operation.
    pub operation_name: Option<String>,
    /// Topic supplied by the client instead of derived from `query`.
    pub topic: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStartPayload {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    variables: Option<Value>,
    #[serde(default)]
    operation_name: Option<String>,
    #[serde(default)]
    topic: Option<String>,
}

impl StartPayload {
    /// Validate a raw `start` payload.
    ///
    /// Every problem found is reported, not just the first.
    pub fn parse(payload: Value) -> Result<Self, SubscriptionError> {
        if !payload.is_object() {
            return Err(SubscriptionError::invalid(
                "start payload must be an object",
            ));
        }
        let raw: RawStartPayload = serde_json::from_value(payload)
            .map_err(|e| SubscriptionError::invalid(format!("malformed start payload: {e}")))?;

        let mut errors = Vec::new();
        let query = raw.query.unwrap_or_default();
        if query.trim().is_empty() {
            errors.push(GraphQLError::new("start payload requires a non-empty `query`"));
        }
        let variables = match raw.variables {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                errors.push(GraphQLError::new("`variables` must be an object"));
                Map::new()
            }
        };
        if !errors.is_empty() {
            return Err(SubscriptionError::InvalidQuery { errors });
        }

        Ok(Self {
            query,
            variables,
            operation_name: raw.operation_name.filter(|n| !n.is_empty()),
            topic: raw.topic.filter(|t| !t.is_empty()),
        })
    }
}

/// Frames the server sends.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake, registration, or unregistration accepted.
    ConnectionAck,
    /// Handshake rejected; the connection stays open.
    ConnectionError {
        /// `{errors: [...]}`.
        payload: Value,
    },
    /// Subscription result.
    Data {
        /// Registration the result belongs to.
        id: RegistrationId,
        /// Resolver output.
        payload: Value,
    },
    /// Registration or delivery failure for one registration.
    Error {
        /// Registration id, `null` when the client sent none.
        id: Option<RegistrationId>,
        /// `{errors: [...]}`.
        payload: Value,
    },
    /// Keep-alive ping.
    #[serde(rename = "ka")]
    KeepAlive,
}

impl ServerFrame {
    /// `error` frame for a failed registration or delivery.
    pub fn error(id: Option<RegistrationId>, err: &SubscriptionError) -> Self {
        Self::Error {
            id,
            payload: err.to_payload(),
        }
    }

    /// `connection_error` frame with a single message.
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            payload: serde_json::json!({ "errors": [GraphQLError::new(message)] }),
        }
    }

    /// Serialize for the outbound queue.
    pub fn encode(&self) -> Option<Arc<String>> {
        serde_json::to_string(self).ok().map(Arc::new)
    }
}
