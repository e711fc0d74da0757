//! Per-channel RPC context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_broker::{Broker, ChannelConnection, ChannelMode};
use tally_core::ChannelId;

/// Everything a handler needs to serve one channel.
pub struct RpcContext {
    /// Broker this channel is attached to.
    pub broker: Arc<Broker>,
    /// The calling channel.
    pub connection: Arc<ChannelConnection>,
    /// Mode the serving transport runs in.
    pub mode: ChannelMode,
    /// Timeout for acknowledged callback deliveries.
    pub callback_timeout: Duration,
    /// When the server started (for uptime calculation).
    pub server_start_time: Instant,
}

impl RpcContext {
    /// ID of the calling channel.
    pub fn channel_id(&self) -> &ChannelId {
        &self.connection.id
    }
}
