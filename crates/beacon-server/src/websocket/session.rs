//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use beacon_core::ConnectionId;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::connection::ClientConnection;
use super::transport::{Disposition, TransportManager};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Interval between server-initiated Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering the client dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on flushing the Close frame after the read side ends.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-socket parameters captured at upgrade.
#[derive(Clone, Debug)]
pub struct SessionParams {
    /// Server-assigned id.
    pub connection_id: ConnectionId,
    /// Negotiated sub-protocol.
    pub protocol: Option<String>,
    /// Credential cookie value.
    pub credential: Option<String>,
    /// Outbound queue capacity.
    pub outbound_buffer: usize,
}

/// Run a WebSocket session for a connected client.
///
/// Inbound text (or UTF-8 binary) frames go to
/// [`TransportManager::handle_message`]; queued outbound frames are written
/// by a forwarder task that also pings the client. The session ends on a
/// client close, an unrecognized frame, a missed pong, slow-client eviction,
/// or server shutdown. On exit the connection is detached, which clears its
/// registrations.
#[instrument(skip_all, fields(client_id = %params.connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    params: SessionParams,
    transport: Arc<TransportManager>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(params.outbound_buffer.max(1));
    let connection = Arc::new(
        ClientConnection::new(params.connection_id.clone(), send_tx)
            .with_protocol(params.protocol)
            .with_credential(params.credential),
    );

    info!(protocol = connection.protocol(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    transport.attach(Arc::clone(&connection)).await;

    // Cancelled by the read side to ask the forwarder for a Close frame.
    let closing = CancellationToken::new();
    // Cancelled when the forwarder exits, for any reason.
    let writer_done = CancellationToken::new();

    let outbound_conn = Arc::clone(&connection);
    let outbound_closing = closing.clone();
    let outbound_done = writer_done.clone();
    let outbound_shutdown = shutdown.clone();
    let outbound = tokio::spawn(async move {
        let _done = outbound_done.drop_guard();
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > PONG_TIMEOUT
                    {
                        warn!("client unresponsive for {:?}, disconnecting", PONG_TIMEOUT);
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_conn.evicted() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                () = outbound_shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                () = outbound_closing.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });
    let outbound_abort = outbound.abort_handle();

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = writer_done.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };

        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    Some(s.to_string())
                } else {
                    info!(len = data.len(), "received non-UTF8 binary frame");
                    None
                }
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                None
            }
        };

        let Some(text) = text else { continue };
        connection.mark_alive();

        if transport.handle_message(&connection, &text).await == Disposition::Close {
            break;
        }
    }

    closing.cancel();
    if tokio::time::timeout(CLOSE_GRACE, outbound).await.is_err() {
        outbound_abort.abort();
    }

    info!(dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    transport.detach(&connection.id).await;
}
