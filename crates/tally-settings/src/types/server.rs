//! Network-facing server settings.

use serde::{Deserialize, Serialize};

/// HTTP/WebSocket listener and connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server-initiated pings, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a client is considered dead, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity (frames).
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
            max_connections: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
        }
    }
}
