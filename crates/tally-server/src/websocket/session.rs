//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::connections::ConnectionRegistry;
use super::heartbeat::{HeartbeatResult, Liveness, run_heartbeat};
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::session::SessionFactory;

/// How long teardown waits for the writer to flush its close frame.
const OUTBOUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-socket tunables.
#[derive(Clone, Copy, Debug)]
pub struct WsSessionConfig {
    /// Interval between Ping frames and liveness checks.
    pub heartbeat_interval: Duration,
    /// Silence after which the client is disconnected.
    pub heartbeat_timeout: Duration,
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Opens a channel session (registers the endpoint, sends
///    `connection.established`)
/// 2. Dispatches inbound text frames
/// 3. Forwards queued outbound frames and sends periodic Pings
/// 4. Ends on close frame, socket error, heartbeat timeout, or shutdown
/// 5. Tears the channel down
#[instrument(skip_all, fields(channel_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    sessions: Arc<SessionFactory>,
    connections: Arc<ConnectionRegistry>,
    config: WsSessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);

    let session = sessions.open(send_tx);
    let channel_id = session.channel_id().clone();
    let _ = tracing::Span::current().record("channel_id", channel_id.as_str());
    connections.add(session.connection().clone());

    let connection_start = Instant::now();
    info!(endpoint_id = %session.endpoint_id(), "websocket client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let cancel = shutdown.child_token();
    let liveness = Arc::new(Liveness::new());

    let heartbeat = {
        let liveness = liveness.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = run_heartbeat(liveness, config.heartbeat_interval, config.heartbeat_timeout, cancel.clone()).await;
            if result == HeartbeatResult::TimedOut {
                warn!("client unresponsive for {:?}, disconnecting", config.heartbeat_timeout);
                cancel.cancel();
            }
        })
    };

    let mut outbound = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ping_interval = tokio::time::interval(config.heartbeat_interval);
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
                        if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                    () = cancel.cancelled() => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::AWAY,
                                reason: Utf8Bytes::from_static("server closing"),
                            })))
                            .await;
                        break;
                    }
                }
            }
            cancel.cancel();
        })
    };

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = cancel.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };
        liveness.mark_alive();

        let text = match msg {
            Message::Text(t) => t.as_str().to_owned(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    info!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        tokio::select! {
            _ = session.handle_text(&text) => {}
            () = cancel.cancelled() => break,
        }
    }

    session.close();
    let _ = connections.remove(&channel_id);
    cancel.cancel();
    if tokio::time::timeout(OUTBOUND_DRAIN_TIMEOUT, &mut outbound).await.is_err() {
        warn!("writer did not finish in {OUTBOUND_DRAIN_TIMEOUT:?}, aborting");
        outbound.abort();
    }
    heartbeat.abort();

    info!("websocket client disconnected");
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}
