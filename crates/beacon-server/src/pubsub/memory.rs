//! In-process pub/sub on a `tokio::sync::broadcast` channel.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use super::{ChannelMessage, PubSub};
use crate::errors::PubSubError;

/// Messages buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// Single-process backend. Every subscriber sees every message published
/// after it subscribed, filtered to its channels.
pub struct MemoryPubSub {
    tx: broadcast::Sender<ChannelMessage>,
}

impl MemoryPubSub {
    /// Empty bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Current number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), PubSubError> {
        // No subscribers is not an error; the message is simply unheard.
        let _ = self.tx.send(ChannelMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, ChannelMessage>, PubSubError> {
        let channels = channels.to_vec();
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| {
            let keep = match item {
                Ok(msg) if channels.contains(&msg.channel) => Some(msg),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "memory pub/sub subscriber lagged");
                    None
                }
            };
            futures::future::ready(keep)
        });
        Ok(stream.boxed())
    }
}
