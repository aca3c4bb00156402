//! Publishing side of the shared channel.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::errors::PubSubError;
use crate::pubsub::{Channels, EventEnvelope, KEEPALIVE_TYPE, PubSub};

/// Writes topic events and keep-alive requests to the shared channel, where
/// every process's [`BroadcastBridge`](crate::bridge::BroadcastBridge)
/// picks them up.
#[derive(Clone)]
pub struct Publisher {
    pubsub: Arc<dyn PubSub>,
    channels: Channels,
}

impl Publisher {
    /// Publisher on `pubsub` using `channels`.
    pub fn new(pubsub: Arc<dyn PubSub>, channels: Channels) -> Self {
        Self { pubsub, channels }
    }

    /// Publish `event` for `topic` on the events channel.
    pub async fn broadcast(&self, topic: &str, event: Value) -> Result<(), PubSubError> {
        let payload = serde_json::to_string(&EventEnvelope::new(topic, event))?;
        self.pubsub.publish(&self.channels.events, payload).await?;
        debug!(topic, "event published");
        Ok(())
    }

    /// Ask every process to send a keep-alive frame to its connections.
    pub async fn keep_alive(&self) -> Result<(), PubSubError> {
        let payload = json!({ "type": KEEPALIVE_TYPE }).to_string();
        self.pubsub.publish(&self.channels.broadcast, payload).await
    }
}
