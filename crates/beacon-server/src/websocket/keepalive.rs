//! Periodic keep-alive requests.

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::publisher::Publisher;

/// Publish a keep-alive request every `interval` until `cancel` fires.
///
/// The request travels over the shared channel so each process fans out
/// exactly once. The first tick is skipped; connections are acknowledged
/// on handshake.
pub async fn run_keep_alive(publisher: Publisher, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = publisher.keep_alive().await {
                    warn!(error = %e, "failed to publish keep-alive");
                } else {
                    debug!("keep-alive published");
                }
            }
            () = cancel.cancelled() => break,
        }
    }
}
