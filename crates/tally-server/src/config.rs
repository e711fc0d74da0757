//! Runtime server configuration.

use std::time::Duration;

use tally_broker::BrokerConfig;
use tally_core::ModePreference;
use tally_settings::TallySettings;

/// Configuration for the Tally server, resolved from [`TallySettings`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server-initiated pings.
    pub heartbeat_interval: Duration,
    /// Silence after which a client is disconnected.
    pub heartbeat_timeout: Duration,
    /// Max inbound message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Requested broker mode.
    pub mode: ModePreference,
    /// Settle delay before unacknowledged channels are activated.
    pub settle_delay: Duration,
    /// Upper bound for acknowledged callback round trips.
    pub callback_timeout: Duration,
}

impl ServerConfig {
    /// Resolve from loaded settings.
    pub fn from_settings(settings: &TallySettings) -> Self {
        let server = &settings.server;
        let broker = &settings.broker;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            max_message_size: server.max_message_size,
            send_queue_capacity: server.send_queue_capacity,
            mode: broker.mode,
            settle_delay: Duration::from_millis(broker.settle_delay_ms),
            callback_timeout: Duration::from_millis(broker.callback_timeout_ms),
        }
    }

    /// Broker tunables derived from this config.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            settle_delay: self.settle_delay,
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&TallySettings::default())
    }
}
