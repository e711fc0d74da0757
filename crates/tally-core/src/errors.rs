//! Error types shared by the broker and its transports.

use thiserror::Error;

use crate::ids::ChannelId;

/// Failures surfaced by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// An event name outside the catalog.
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
    /// The channel has no endpoint identity (never connected, or departed).
    #[error("channel {0} is not registered with the broker")]
    NotRegistered(ChannelId),
    /// The channel was closed while the operation was in flight.
    #[error("channel closed")]
    ChannelClosed,
}

/// Failures delivering a message or callback over a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The remote side is gone.
    #[error("channel closed")]
    Closed,
    /// The outbound queue is full; the message was dropped.
    #[error("outbound queue full, message dropped")]
    Backpressure,
    /// A callback round trip did not complete in time.
    #[error("callback timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The remote callback ran and reported an error.
    #[error("remote callback failed: {0}")]
    Remote(String),
    /// A frame could not be serialized.
    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ChannelError {
    /// Whether this failure means the channel is permanently unusable.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
