//! Error types surfaced to subscribers and operators.
//!
//! [`SubscriptionError`] is what a client can see: it renders into the
//! `payload` of an `error` frame via [`SubscriptionError::to_payload`], with
//! `extensions.code` separating forbidden registrations from malformed ones.
//! [`PubSubError`] never reaches a client; the bridge logs it and reconnects.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Error code for malformed registrations.
pub const BAD_REQUEST: &str = "BAD_REQUEST";
/// Error code for registrations rejected by a topic handler.
pub const FORBIDDEN: &str = "FORBIDDEN";
/// Error code for server-side failures.
pub const INTERNAL: &str = "INTERNAL";

/// A position in a GraphQL document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

/// A single GraphQL-style error entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Human-readable message.
    pub message: String,
    /// Document positions the error refers to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<SourceLocation>,
    /// Extra machine-readable data (always carries `code` once rendered).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// Error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            extensions: None,
        }
    }

    /// Attach a document position.
    #[must_use]
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.locations.push(SourceLocation { line, column });
        self
    }

    fn with_code(mut self, code: &str) -> Self {
        match &mut self.extensions {
            Some(Value::Object(map)) => {
                let _ = map
                    .entry("code")
                    .or_insert_with(|| Value::String(code.to_string()));
            }
            _ => self.extensions = Some(json!({ "code": code })),
        }
        self
    }
}

/// Errors raised while registering or delivering a subscription.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The `start` payload or its query could not be parsed.
    #[error("invalid subscription request: {}", summarize(.errors))]
    InvalidQuery {
        /// Structured validation errors.
        errors: Vec<GraphQLError>,
    },
    /// The query parsed but selects no subscription field.
    #[error("subscription query does not select a topic")]
    MissingTopic,
    /// The topic handler refused the registration.
    #[error("{message}")]
    Unauthorized {
        /// Reason shown to the client.
        message: String,
    },
    /// A driver name with no registered factory.
    #[error("{kind} driver [{name}] is not supported")]
    UnknownDriver {
        /// Driver family (`storage` or `context`).
        kind: &'static str,
        /// Requested name.
        name: String,
    },
    /// A known driver lacking the configuration it needs.
    #[error("driver [{name}] is not configured")]
    DriverNotConfigured {
        /// Driver name.
        name: String,
    },
    /// The resolver failed to produce a payload.
    #[error("{message}")]
    Resolver {
        /// Resolver-supplied message.
        message: String,
    },
    /// Anything else.
    #[error("internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

fn summarize(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SubscriptionError {
    /// Shorthand for a single-message [`SubscriptionError::InvalidQuery`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            errors: vec![GraphQLError::new(message)],
        }
    }

    /// Client-facing error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery { .. } | Self::MissingTopic => BAD_REQUEST,
            Self::Unauthorized { .. } => FORBIDDEN,
            Self::UnknownDriver { .. }
            | Self::DriverNotConfigured { .. }
            | Self::Resolver { .. }
            | Self::Internal { .. } => INTERNAL,
        }
    }

    /// Render as an `error` frame payload: `{"errors": [...]}`.
    pub fn to_payload(&self) -> Value {
        let code = self.code();
        let errors: Vec<GraphQLError> = match self {
            Self::InvalidQuery { errors } if !errors.is_empty() => {
                errors.iter().cloned().map(|e| e.with_code(code)).collect()
            }
            other => vec![GraphQLError::new(other.to_string()).with_code(code)],
        };
        json!({ "errors": errors })
    }
}

/// Errors from a pub/sub backend.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// The backend refused or failed an operation.
    #[error("pub/sub backend error: {0}")]
    Backend(String),
    /// The backend connection or channel is gone.
    #[error("pub/sub channel closed")]
    Closed,
    /// A payload could not be encoded.
    #[error("pub/sub payload error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for PubSubError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}
