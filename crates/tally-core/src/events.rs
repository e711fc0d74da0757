//! The closed catalog of broker events.
//!
//! [`EventName`] is what clients subscribe to; [`BrokerEvent`] is what the
//! broker emits, carrying its payload in typed form. The wire name of every
//! event is kebab-case (`counter-changed`, `endpoint-set-changed`,
//! `init-complete`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::BrokerError;
use crate::ids::EndpointId;

/// Names of the events a client may subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    /// The shared counter changed. Payload: new value.
    CounterChanged,
    /// The set of live endpoints changed. Payload: the full set.
    EndpointSetChanged,
    /// The receiving channel finished initialising. Payload: its endpoint id.
    InitComplete,
}

impl EventName {
    /// Every event in the catalog.
    pub const ALL: [Self; 3] = [
        Self::CounterChanged,
        Self::EndpointSetChanged,
        Self::InitComplete,
    ];

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CounterChanged => "counter-changed",
            Self::EndpointSetChanged => "endpoint-set-changed",
            Self::InitComplete => "init-complete",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| BrokerError::UnknownEvent(s.to_owned()))
    }
}

/// An emitted event together with its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerEvent {
    /// New counter value after a mutation.
    CounterChanged(i64),
    /// Snapshot of all live endpoints after a membership change.
    EndpointSetChanged(Vec<EndpointId>),
    /// Endpoint id of the channel that just became active.
    InitComplete(EndpointId),
}

impl BrokerEvent {
    /// The catalog entry this event belongs to.
    pub fn name(&self) -> EventName {
        match self {
            Self::CounterChanged(_) => EventName::CounterChanged,
            Self::EndpointSetChanged(_) => EventName::EndpointSetChanged,
            Self::InitComplete(_) => EventName::InitComplete,
        }
    }

    /// JSON payload as delivered to remote callbacks.
    pub fn payload(&self) -> Value {
        match self {
            Self::CounterChanged(value) => Value::from(*value),
            Self::EndpointSetChanged(ids) => {
                Value::Array(ids.iter().map(|id| Value::from(id.as_str())).collect())
            }
            Self::InitComplete(id) => Value::from(id.as_str()),
        }
    }
}
