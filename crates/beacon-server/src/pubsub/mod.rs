//! Shared publish/subscribe channel between processes.
//!
//! Two logical channels ride on one backend: the broadcast channel carries
//! keep-alive requests and topic events pushed by external broadcasters; the
//! events channel carries [`EventEnvelope`]s written by
//! [`Publisher`](crate::publisher::Publisher).

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use beacon_settings::{PubSubBackend, PubSubSettings};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PubSubError;

pub use memory::MemoryPubSub;
#[cfg(feature = "redis")]
pub use self::redis::RedisPubSub;

/// Value of `type` in a keep-alive request on the broadcast channel.
pub const KEEPALIVE_TYPE: &str = "keepalive";

/// One message received from a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Channel the message arrived on.
    pub channel: String,
    /// Raw payload.
    pub payload: String,
}

/// A publish/subscribe backend.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), PubSubError>;

    /// Subscribe to `channels`. The stream ends when the backend connection
    /// is lost.
    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, ChannelMessage>, PubSubError>;
}

/// Channel names used by one deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channels {
    /// Keep-alive requests and broadcaster events.
    pub broadcast: String,
    /// Publisher envelopes.
    pub events: String,
}

impl Channels {
    /// Channel names from settings.
    pub fn from_settings(settings: &PubSubSettings) -> Self {
        Self {
            broadcast: settings.broadcast_channel.clone(),
            events: settings.events_channel.clone(),
        }
    }

    /// Both channels, broadcast first.
    pub fn all(&self) -> Vec<String> {
        vec![self.broadcast.clone(), self.events.clone()]
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::from_settings(&PubSubSettings::default())
    }
}

/// A topic event as carried on the events channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Topic the event belongs to.
    #[serde(alias = "subscription")]
    pub topic: String,
    /// Event body; may embed object references.
    #[serde(default)]
    pub event: Value,
}

impl EventEnvelope {
    /// Envelope for `event` on `topic`.
    pub fn new(topic: impl Into<String>, event: Value) -> Self {
        Self {
            topic: topic.into(),
            event,
        }
    }

    /// Read a broadcaster-style object: the topic under `topic` or
    /// `subscription`, the event under `event` or, when absent, the
    /// remaining fields.
    fn from_object(mut object: Map<String, Value>) -> Option<Self> {
        let topic = match object.remove("topic").or_else(|| object.remove("subscription")) {
            Some(Value::String(topic)) if !topic.is_empty() => topic,
            _ => return None,
        };
        let event = object
            .remove("event")
            .unwrap_or_else(|| Value::Object(object));
        Some(Self { topic, event })
    }
}

/// Decoded pub/sub message.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    /// Fan a keep-alive frame out to every connection.
    KeepAlive,
    /// Deliver a topic event.
    Event(EventEnvelope),
    /// Valid JSON that carries neither.
    Ignored,
}

impl Incoming {
    /// Decode a payload received on either channel.
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        let Value::Object(object) = serde_json::from_str::<Value>(payload)? else {
            return Ok(Self::Ignored);
        };
        if object.get("type").and_then(Value::as_str) == Some(KEEPALIVE_TYPE) {
            return Ok(Self::KeepAlive);
        }
        Ok(EventEnvelope::from_object(object).map_or(Self::Ignored, Self::Event))
    }
}

/// Build the configured backend.
pub fn connect(settings: &PubSubSettings) -> Result<Arc<dyn PubSub>, PubSubError> {
    match settings.backend {
        PubSubBackend::Memory => {
            let backend: Arc<dyn PubSub> = Arc::new(MemoryPubSub::new());
            Ok(backend)
        }
        #[cfg(feature = "redis")]
        PubSubBackend::Redis => {
            let backend: Arc<dyn PubSub> = Arc::new(RedisPubSub::open(&settings.url)?);
            Ok(backend)
        }
        #[cfg(not(feature = "redis"))]
        PubSubBackend::Redis => Err(PubSubError::Backend(
            "redis backend requires the `redis` feature".into(),
        )),
    }
}
