//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;
use tally_broker::ChannelMode;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Live endpoints on the shared broker (0 in isolated mode).
    pub endpoints: usize,
    /// Broker mode the gateway runs in.
    pub mode: ChannelMode,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, endpoints: usize, mode: ChannelMode) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        endpoints,
        mode,
    }
}
