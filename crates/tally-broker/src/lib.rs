//! # tally-broker
//!
//! A single long-lived broker holding one shared counter, reachable from
//! many client channels at once.
//!
//! - [`channel`]: per-client connection, outbound queue, callback round trips
//! - [`callback`]: capability handles the broker invokes on emission
//! - [`subscriptions`]: event-name keyed subscription registry
//! - [`endpoints`]: live endpoint set with change notifications
//! - [`store`]: the counter, emitting `counter-changed` on every mutation
//! - [`broker`]: composition and per-channel lifecycle
//! - [`mode`]: shared vs. isolated hosting

#![deny(unsafe_code)]

pub mod broker;
pub mod callback;
pub mod channel;
pub mod endpoints;
pub mod mode;
pub mod store;
pub mod subscriptions;

pub use broker::{Broker, BrokerConfig, ChannelState};
pub use callback::{Callback, FnCallback, RemoteCallback};
pub use channel::ChannelConnection;
pub use mode::{BrokerHost, ChannelMode, TransportCapabilities};
pub use subscriptions::{EmitReport, SubscriptionRegistry};
