//! Shared vs. isolated broker hosting.
//!
//! The broker code is identical in both modes; only the mapping from
//! connections to broker instances differs. A multiplexed transport (one
//! process, many clients) shares one broker. A transport that can only
//! ever carry one client gets a private broker per connection.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tally_core::ModePreference;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerConfig};

/// What a transport can do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Whether many client connections reach the same process.
    pub multiplexed: bool,
}

impl TransportCapabilities {
    /// Capabilities of a transport that serves many clients.
    pub const MULTIPLEXED: Self = Self { multiplexed: true };
    /// Capabilities of a transport bound to a single client.
    pub const DEDICATED: Self = Self { multiplexed: false };
}

/// Mode selected at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Every connection attaches to one broker.
    Shared,
    /// Every connection gets its own broker.
    Isolated,
}

impl ChannelMode {
    /// Resolve a preference against what the transport supports.
    pub fn detect(preference: ModePreference, capabilities: TransportCapabilities) -> Self {
        let mode = match (preference, capabilities.multiplexed) {
            (ModePreference::Auto | ModePreference::Shared, true) => Self::Shared,
            (ModePreference::Shared, false) => {
                warn!("shared mode requested on a non-multiplexed transport, falling back to isolated");
                Self::Isolated
            }
            (ModePreference::Auto | ModePreference::Isolated, false)
            | (ModePreference::Isolated, true) => Self::Isolated,
        };
        info!(%preference, multiplexed = capabilities.multiplexed, %mode, "channel mode selected");
        mode
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "shared",
            Self::Isolated => "isolated",
        })
    }
}

/// Hands out the broker each new connection should attach to.
pub enum BrokerHost {
    /// One broker for everyone.
    Shared(Arc<Broker>),
    /// A fresh broker per connection.
    Isolated(BrokerConfig),
}

impl BrokerHost {
    /// Build a host for `mode`.
    pub fn new(mode: ChannelMode, config: BrokerConfig) -> Self {
        match mode {
            ChannelMode::Shared => Self::Shared(Broker::new(config)),
            ChannelMode::Isolated => Self::Isolated(config),
        }
    }

    /// Broker for a newly opened connection.
    pub fn attach(&self) -> Arc<Broker> {
        match self {
            Self::Shared(broker) => broker.clone(),
            Self::Isolated(config) => Broker::new(config.clone()),
        }
    }

    /// Mode this host implements.
    pub fn mode(&self) -> ChannelMode {
        match self {
            Self::Shared(_) => ChannelMode::Shared,
            Self::Isolated(_) => ChannelMode::Isolated,
        }
    }

    /// The shared broker, if there is one.
    pub fn shared(&self) -> Option<&Arc<Broker>> {
        match self {
            Self::Shared(broker) => Some(broker),
            Self::Isolated(_) => None,
        }
    }
}
