//! Capability handles that deliver events to subscribers.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{BrokerEvent, ChannelError};
use tracing::warn;

use crate::channel::ChannelConnection;

/// A subscriber-side action the broker can trigger.
///
/// `invoke` must not block: remote implementations queue a frame and
/// return immediately. Implementations must not call back into the
/// counter store or endpoint registry synchronously.
pub trait Callback: Send + Sync {
    /// Deliver one event.
    fn invoke(&self, event: &BrokerEvent) -> Result<(), ChannelError>;
}

/// A callback living on the client at the other end of a channel.
pub struct RemoteCallback {
    channel: Arc<ChannelConnection>,
    callback_id: String,
    ack_timeout: Option<Duration>,
}

impl RemoteCallback {
    /// Fire-and-forget delivery.
    pub fn new(channel: Arc<ChannelConnection>, callback_id: impl Into<String>) -> Self {
        Self {
            channel,
            callback_id: callback_id.into(),
            ack_timeout: None,
        }
    }

    /// Delivery that waits (in the background) for the client's reply and
    /// logs failed or late acknowledgements.
    #[must_use]
    pub fn acknowledged(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    /// Client-side handle this callback targets.
    pub fn callback_id(&self) -> &str {
        &self.callback_id
    }
}

impl Callback for RemoteCallback {
    fn invoke(&self, event: &BrokerEvent) -> Result<(), ChannelError> {
        let Some(timeout) = self.ack_timeout else {
            return self.channel.fire_callback(&self.callback_id, event);
        };
        if self.channel.is_closed() {
            return Err(ChannelError::Closed);
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return self.channel.fire_callback(&self.callback_id, event);
        };

        let channel = self.channel.clone();
        let callback_id = self.callback_id.clone();
        let event = event.clone();
        let _ = runtime.spawn(async move {
            if let Err(error) = channel.call_callback(&callback_id, &event, timeout).await {
                warn!(
                    channel_id = %channel.id,
                    callback_id,
                    event = %event.name(),
                    %error,
                    "acknowledged callback failed"
                );
            }
        });
        Ok(())
    }
}

/// An in-process callback backed by a closure.
pub struct FnCallback<F>(F);

impl<F> FnCallback<F>
where
    F: Fn(&BrokerEvent) -> Result<(), ChannelError> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Callback for FnCallback<F>
where
    F: Fn(&BrokerEvent) -> Result<(), ChannelError> + Send + Sync,
{
    fn invoke(&self, event: &BrokerEvent) -> Result<(), ChannelError> {
        (self.0)(event)
    }
}

/// Box a closure as a shareable callback.
pub fn from_fn<F>(f: F) -> Arc<dyn Callback>
where
    F: Fn(&BrokerEvent) -> Result<(), ChannelError> + Send + Sync + 'static,
{
    Arc::new(FnCallback::new(f))
}
