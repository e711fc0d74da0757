//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the keys it changes.

mod broker;
mod server;

pub use broker::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "broker": { "mode": "isolated", "settleDelayMs": 250 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TallySettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Broker semantics.
    pub broker: BrokerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TallySettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be greater than zero".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) must be at least heartbeatIntervalMs ({})",
                self.server.heartbeat_timeout_ms, self.server.heartbeat_interval_ms
            )));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be greater than zero".into(),
            ));
        }
        if self.broker.callback_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.callbackTimeoutMs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        TallySettings::default().validate().unwrap();
    }

    #[test]
    fn timeout_below_interval_rejected() {
        let mut s = TallySettings::default();
        s.server.heartbeat_timeout_ms = 1_000;
        s.server.heartbeat_interval_ms = 5_000;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("heartbeatTimeoutMs"));
    }

    #[test]
    fn zero_queue_rejected() {
        let mut s = TallySettings::default();
        s.server.send_queue_capacity = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn empty_object_deserializes_to_defaults() {
        let s: TallySettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s, TallySettings::default());
    }
}
