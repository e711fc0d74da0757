//! Broker behaviour and logging settings.

use serde::{Deserialize, Serialize};
use tally_core::ModePreference;

/// Settings that shape broker semantics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Shared vs. isolated broker per connection.
    pub mode: ModePreference,
    /// Delay between registration and `init-complete` for clients that
    /// never send `ready`, in milliseconds.
    pub settle_delay_ms: u64,
    /// Upper bound for a callback round trip, in milliseconds.
    pub callback_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            mode: ModePreference::Auto,
            settle_delay_ms: 500,
            callback_timeout_ms: 5_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
