//! Redis-backed pub/sub for multi-process deployments.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use ::redis::AsyncCommands;
use ::redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{ChannelMessage, PubSub};
use crate::errors::PubSubError;

/// Redis `PUBLISH`/`SUBSCRIBE` backend.
///
/// Publishing shares one multiplexed connection, opened on first use.
/// Each [`PubSub::subscribe`] call opens a dedicated pub/sub connection.
pub struct RedisPubSub {
    client: ::redis::Client,
    publisher: OnceCell<MultiplexedConnection>,
}

impl RedisPubSub {
    /// Client for `url`. No connection is made until first use.
    pub fn open(url: &str) -> Result<Self, PubSubError> {
        Ok(Self {
            client: ::redis::Client::open(url)?,
            publisher: OnceCell::new(),
        })
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, PubSubError> {
        let conn = self
            .publisher
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), PubSubError> {
        let mut conn = self.publisher().await?;
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!(channel, receivers, "published");
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, ChannelMessage>, PubSubError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel).await?;
        }
        let stream = pubsub.into_on_message().filter_map(|msg| {
            let channel = msg.get_channel_name().to_string();
            let decoded = match msg.get_payload::<String>() {
                Ok(payload) => Some(ChannelMessage { channel, payload }),
                Err(e) => {
                    warn!(channel, error = %e, "non-text redis payload");
                    None
                }
            };
            futures::future::ready(decoded)
        });
        Ok(stream.boxed())
    }
}
