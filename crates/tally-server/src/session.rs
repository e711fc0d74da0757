//! Transport-agnostic channel sessions.
//!
//! A transport (WebSocket, stdio) owns the physical I/O. For every client
//! it asks a [`SessionFactory`] for a [`ChannelSession`], feeds it inbound
//! text frames, drains the outbound queue, and closes the session when the
//! transport ends. Everything in between is identical for all transports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tally_broker::{BrokerHost, ChannelConnection, ChannelMode};
use tally_core::{ChannelId, EndpointId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::rpc::context::RpcContext;
use crate::rpc::errors;
use crate::rpc::registry::MethodRegistry;
use crate::rpc::types::{ClientFrame, RpcResponse, ServerEvent};

/// Opens channel sessions against a broker host.
pub struct SessionFactory {
    host: BrokerHost,
    registry: Arc<MethodRegistry>,
    callback_timeout: Duration,
    start_time: Instant,
}

impl SessionFactory {
    /// Create a factory serving `registry` on top of `host`.
    pub fn new(host: BrokerHost, registry: Arc<MethodRegistry>, callback_timeout: Duration) -> Self {
        Self {
            host,
            registry,
            callback_timeout,
            start_time: Instant::now(),
        }
    }

    /// Attach a new client whose outbound frames go to `tx`.
    ///
    /// Registers the channel with its broker and queues the
    /// `connection.established` event. Must be called inside a Tokio runtime.
    pub fn open(&self, tx: mpsc::Sender<Arc<String>>) -> ChannelSession {
        let broker = self.host.attach();
        let connection = Arc::new(ChannelConnection::new(tx));
        let endpoint_id = broker.connect(connection.clone());
        let mode = self.host.mode();

        let established = ServerEvent::new(
            "connection.established",
            json!({
                "channelId": connection.id,
                "endpointId": endpoint_id,
                "mode": mode,
            }),
        );
        if let Err(error) = connection.send_json(&established) {
            warn!(channel_id = %connection.id, %error, "failed to queue connection.established");
        }

        ChannelSession {
            ctx: RpcContext {
                broker,
                connection,
                mode,
                callback_timeout: self.callback_timeout,
                server_start_time: self.start_time,
            },
            registry: self.registry.clone(),
            endpoint_id,
        }
    }

    /// The broker host sessions attach to.
    pub fn host(&self) -> &BrokerHost {
        &self.host
    }

    /// Mode every session runs in.
    pub fn mode(&self) -> ChannelMode {
        self.host.mode()
    }

    /// The method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// When this factory was created.
    pub fn start_time(&self) -> Instant {
        self.start_time
    }
}

/// One client attached to a broker.
pub struct ChannelSession {
    ctx: RpcContext,
    registry: Arc<MethodRegistry>,
    endpoint_id: EndpointId,
}

impl ChannelSession {
    /// Channel id.
    pub fn channel_id(&self) -> &ChannelId {
        self.ctx.channel_id()
    }

    /// Endpoint id assigned at registration.
    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    /// The channel's connection object.
    pub fn connection(&self) -> &Arc<ChannelConnection> {
        &self.ctx.connection
    }

    /// RPC context handed to handlers.
    pub fn context(&self) -> &RpcContext {
        &self.ctx
    }

    /// Handle one inbound text frame.
    ///
    /// Requests are dispatched and their response is queued on the
    /// channel behind any callback frames the call produced. A full queue
    /// delays the response rather than dropping it, so the transport must
    /// drain the queue concurrently. Callback replies resolve the matching
    /// invocation and produce no response. Returns the response, if any.
    pub async fn handle_text(&self, text: &str) -> Option<RpcResponse> {
        let response = match ClientFrame::parse(text) {
            Ok(ClientFrame::Request(request)) => self.registry.dispatch(request, &self.ctx).await,
            Ok(ClientFrame::CallbackResult(reply)) => {
                let invocation_id = reply.invocation_id.clone();
                if !self.ctx.connection.resolve_callback(&invocation_id, reply.into_outcome()) {
                    debug!(channel_id = %self.channel_id(), %invocation_id, "late or unknown callback reply");
                }
                return None;
            }
            Err(error) => {
                warn!(channel_id = %self.channel_id(), %error, "invalid frame received");
                RpcResponse::error(request_id_of(text), errors::PARSE_ERROR, format!("Invalid frame: {error}"))
            }
        };

        if let Err(error) = self.ctx.connection.send_json_wait(&response).await {
            info!(channel_id = %self.channel_id(), id = %response.id, %error, "channel closed before response was queued");
        }
        Some(response)
    }

    /// Tear down the channel: broker state first, then the connection.
    ///
    /// Idempotent.
    pub fn close(&self) {
        let _ = self.ctx.broker.disconnect(self.channel_id());
        self.ctx.connection.close();
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Best-effort request id from a frame that failed to parse.
fn request_id_of(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| "unknown".to_string())
}
