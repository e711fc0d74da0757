//! `TallyServer`: Axum HTTP + WebSocket gateway.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tally_broker::BrokerHost;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::{self as server_metrics, WS_CONNECTIONS_REJECTED_TOTAL};
use crate::rpc::handlers::register_all;
use crate::rpc::registry::MethodRegistry;
use crate::session::SessionFactory;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connections::ConnectionRegistry;
use crate::websocket::session::{WsSessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Opens channel sessions.
    pub sessions: Arc<SessionFactory>,
    /// Live WebSocket connections.
    pub connections: Arc<ConnectionRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The gateway server.
pub struct TallyServer {
    state: AppState,
}

impl TallyServer {
    /// Create a server attaching WebSocket clients to `host`.
    pub fn new(config: ServerConfig, host: BrokerHost, metrics: Option<PrometheusHandle>) -> Self {
        let mut registry = MethodRegistry::new();
        register_all(&mut registry);
        let sessions = SessionFactory::new(host, Arc::new(registry), config.callback_timeout);
        Self {
            state: AppState {
                sessions: Arc::new(sessions),
                connections: Arc::new(ConnectionRegistry::new()),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config: Arc::new(config),
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the serve
    /// task, which finishes once [`ShutdownCoordinator::shutdown`] is
    /// called and in-flight HTTP requests complete. Hand the task to
    /// [`ShutdownCoordinator::drain`] to also wait for open sockets.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(%addr, mode = %self.state.sessions.mode(), "tally server listening");
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server terminated with error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get the session factory (and through it, the broker host).
    pub fn sessions(&self) -> &Arc<SessionFactory> {
        &self.state.sessions
    }

    /// Get the live connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.state.connections
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.connections.count() >= state.config.max_connections {
        warn!(max = state.config.max_connections, "connection limit reached, refusing upgrade");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let session_config = WsSessionConfig {
        heartbeat_interval: state.config.heartbeat_interval,
        heartbeat_timeout: state.config.heartbeat_timeout,
        send_queue_capacity: state.config.send_queue_capacity,
    };
    let shutdown = state.shutdown.token();
    let guard = state.shutdown.session_guard();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, state.sessions, state.connections, session_config, shutdown).await;
            drop(guard);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let host = state.sessions.host();
    let endpoints = host.shared().map_or(0, |broker| broker.endpoint_count());
    Json(health::health_check(
        state.sessions.start_time(),
        state.connections.count(),
        endpoints,
        host.mode(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => server_metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
