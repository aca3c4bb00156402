//! Broadcast bridge: shared pub/sub channel → local fan-out.

use std::sync::Arc;
use std::time::Duration;

use beacon_settings::PubSubSettings;
use futures::StreamExt;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{PUBSUB_DECODE_ERRORS_TOTAL, PUBSUB_RECONNECTS_TOTAL};
use crate::pubsub::{ChannelMessage, Channels, Incoming, PubSub};
use crate::websocket::TransportManager;

/// First reconnect delay.
const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32 << attempt.min(20);
    base.saturating_mul(factor).min(max)
}

/// Subscribes to both logical channels and feeds every message into the
/// local [`TransportManager`].
pub struct BroadcastBridge {
    pubsub: Arc<dyn PubSub>,
    channels: Channels,
    transport: Arc<TransportManager>,
    base_delay: Duration,
    max_delay: Duration,
    subscribed: watch::Sender<bool>,
}

impl BroadcastBridge {
    /// Bridge from `pubsub` into `transport`.
    pub fn new(
        pubsub: Arc<dyn PubSub>,
        channels: Channels,
        transport: Arc<TransportManager>,
    ) -> Self {
        let (subscribed, _) = watch::channel(false);
        Self {
            pubsub,
            channels,
            transport,
            base_delay: BASE_RECONNECT_DELAY,
            max_delay: Duration::from_millis(PubSubSettings::default().max_reconnect_delay_ms),
            subscribed,
        }
    }

    /// Override the reconnect delay bounds.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max.max(base);
        self
    }

    /// Watch whether the bridge currently holds a live subscription.
    pub fn subscribed(&self) -> watch::Receiver<bool> {
        self.subscribed.subscribe()
    }

    /// Run on a new task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Subscribe and dispatch until `cancel` fires, re-subscribing with
    /// capped backoff whenever the subscription fails or its stream ends.
    #[tracing::instrument(skip_all, name = "broadcast_bridge", fields(backend = self.pubsub.name()))]
    pub async fn run(self, cancel: CancellationToken) {
        let channels = self.channels.all();
        let mut attempt: u32 = 0;

        loop {
            let subscription = tokio::select! {
                result = self.pubsub.subscribe(&channels) => result,
                () = cancel.cancelled() => break,
            };

            match subscription {
                Ok(mut stream) => {
                    attempt = 0;
                    let _ = self.subscribed.send_replace(true);
                    info!(?channels, "subscribed");
                    loop {
                        tokio::select! {
                            msg = stream.next() => match msg {
                                Some(msg) => {
                                    let _ = self.dispatch(msg).await;
                                }
                                None => break,
                            },
                            () = cancel.cancelled() => {
                                let _ = self.subscribed.send_replace(false);
                                info!("broadcast bridge cancelled");
                                return;
                            }
                        }
                    }
                    let _ = self.subscribed.send_replace(false);
                    warn!("subscription stream ended");
                }
                Err(e) => warn!(error = %e, attempt, "subscribe failed"),
            }

            let delay = backoff_delay(attempt, self.base_delay, self.max_delay);
            attempt = attempt.saturating_add(1);
            counter!(PUBSUB_RECONNECTS_TOTAL).increment(1);
            debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "reconnecting");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => break,
            }
        }
        info!("broadcast bridge stopped");
    }

    /// Handle one channel message. Returns the number of frames queued.
    pub async fn dispatch(&self, msg: ChannelMessage) -> usize {
        match Incoming::decode(&msg.payload) {
            Ok(Incoming::KeepAlive) => self.transport.keep_alive().await,
            Ok(Incoming::Event(envelope)) => {
                debug!(channel = %msg.channel, topic = %envelope.topic, "incoming event");
                self.transport
                    .broadcast(&envelope.topic, envelope.event)
                    .await
            }
            Ok(Incoming::Ignored) => {
                debug!(channel = %msg.channel, "ignoring message without topic");
                0
            }
            Err(e) => {
                counter!(PUBSUB_DECODE_ERRORS_TOTAL).increment(1);
                warn!(channel = %msg.channel, error = %e, "undecodable pub/sub payload");
                0
            }
        }
    }
}
