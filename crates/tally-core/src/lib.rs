//! # tally-core
//!
//! Foundation types for the Tally shared-state broker.
//!
//! - [`ids`]: branded identity newtypes (endpoints, subscriptions, channels)
//! - [`events`]: the closed event catalog and typed event payloads
//! - [`errors`]: broker and channel error types
//! - [`logging`]: `tracing` subscriber initialisation
//! - [`mode`]: shared/isolated mode preference

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod mode;

pub use errors::{BrokerError, ChannelError};
pub use events::{BrokerEvent, EventName};
pub use ids::{ChannelId, EndpointId, InvocationId, SubscriptionId};
pub use mode::ModePreference;
