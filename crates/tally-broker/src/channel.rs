//! One logical connection between a client and the broker.
//!
//! A [`ChannelConnection`] owns the outbound half of a transport: a bounded
//! queue of serialized frames drained by the transport's writer task. On top
//! of plain sends it implements callback invocation, both fire-and-forget
//! and as a round trip correlated by [`InvocationId`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tally_core::{BrokerEvent, ChannelError, ChannelId, EventName, InvocationId};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type PendingReply = oneshot::Sender<Result<Value, ChannelError>>;

/// Outbound frame asking the client to run one of its callbacks.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackFrame<'a> {
    /// Always `"callback"`.
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    /// Client-side callback handle supplied at subscribe time.
    pub callback_id: &'a str,
    /// Present when the broker expects a `callbackResult` reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<&'a InvocationId>,
    /// Event being delivered.
    pub event: EventName,
    /// Event payload.
    pub payload: Value,
}

impl<'a> CallbackFrame<'a> {
    fn new(callback_id: &'a str, invocation_id: Option<&'a InvocationId>, event: &BrokerEvent) -> Self {
        Self {
            frame_type: "callback",
            callback_id,
            invocation_id,
            event: event.name(),
            payload: event.payload(),
        }
    }
}

/// A connected client as seen by the broker.
pub struct ChannelConnection {
    /// Unique channel ID.
    pub id: ChannelId,
    /// Send side of the transport's writer queue.
    tx: mpsc::Sender<Arc<String>>,
    /// Count of messages dropped due to a full queue.
    pub dropped_messages: AtomicU64,
    closed: AtomicBool,
    pending: Mutex<HashMap<InvocationId, PendingReply>>,
}

impl ChannelConnection {
    /// Create a channel with a freshly generated ID.
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self::with_id(ChannelId::new(), tx)
    }

    /// Create a channel with a known ID.
    pub fn with_id(id: ChannelId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            dropped_messages: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a serialized frame for the client.
    ///
    /// Never blocks. A full queue drops the frame and reports
    /// [`ChannelError::Backpressure`]; a gone receiver marks the channel
    /// closed and reports [`ChannelError::Closed`].
    pub fn send(&self, message: Arc<String>) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(ChannelError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(ChannelError::Closed)
            }
        }
    }

    /// Serialize a value and queue it for the client.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ChannelError> {
        let json = serde_json::to_string(value)?;
        self.send(Arc::new(json))
    }

    /// Serialize a value and queue it, waiting for room in the queue.
    ///
    /// Used for frames the client is blocked on, such as the response to
    /// its own request, which must not be dropped under backpressure.
    /// Fails with [`ChannelError::Closed`] once the channel is closed or
    /// the transport's writer has gone away.
    pub async fn send_json_wait<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let json = serde_json::to_string(value)?;
        if self.tx.send(Arc::new(json)).await.is_err() {
            self.close();
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    /// Ask the client to run `callback_id` without waiting for a reply.
    pub fn fire_callback(&self, callback_id: &str, event: &BrokerEvent) -> Result<(), ChannelError> {
        self.send_json(&CallbackFrame::new(callback_id, None, event))
    }

    /// Run `callback_id` on the client and wait for its reply.
    ///
    /// Fails with [`ChannelError::Timeout`] if no reply arrives within
    /// `timeout`, with [`ChannelError::Closed`] if the channel closes first,
    /// and with [`ChannelError::Remote`] if the client reports an error.
    pub async fn call_callback(
        &self,
        callback_id: &str,
        event: &BrokerEvent,
        timeout: Duration,
    ) -> Result<Value, ChannelError> {
        let invocation_id = InvocationId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.pending.lock().insert(invocation_id.clone(), reply_tx);

        if let Err(e) = self.send_json(&CallbackFrame::new(callback_id, Some(&invocation_id), event)) {
            let _ = self.pending.lock().remove(&invocation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_dropped)) => Err(ChannelError::Closed),
            Err(_elapsed) => {
                let _ = self.pending.lock().remove(&invocation_id);
                Err(ChannelError::Timeout(timeout))
            }
        }
    }

    /// Deliver the client's reply to a pending [`call_callback`].
    ///
    /// Returns `false` if nothing was waiting on `invocation_id`.
    ///
    /// [`call_callback`]: Self::call_callback
    pub fn resolve_callback(&self, invocation_id: &InvocationId, outcome: Result<Value, String>) -> bool {
        let Some(reply) = self.pending.lock().remove(invocation_id) else {
            debug!(channel_id = %self.id, %invocation_id, "reply for unknown invocation");
            return false;
        };
        reply.send(outcome.map_err(ChannelError::Remote)).is_ok()
    }

    /// Number of callback round trips awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    /// Mark the channel closed and fail every pending round trip.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<PendingReply> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for reply in drained {
            let _ = reply.send(Err(ChannelError::Closed));
        }
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total messages dropped for this channel.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
