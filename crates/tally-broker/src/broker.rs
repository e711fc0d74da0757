//! The broker: composition root and per-channel lifecycle.
//!
//! Each channel moves through `Connecting → Registered → Active →
//! Disconnected`. Registration assigns an [`EndpointId`]; activation
//! delivers `init-complete` to that channel's own subscriptions, either
//! when the client sends `ready` or when the settle delay elapses,
//! whichever comes first. Departure (explicit, transport close, or a
//! closed channel found during delivery) removes the endpoint and every
//! subscription the channel created.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tally_core::errors::Result;
use tally_core::{BrokerError, BrokerEvent, ChannelId, EndpointId, EventName, SubscriptionId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::callback::Callback;
use crate::channel::ChannelConnection;
use crate::endpoints::EndpointRegistry;
use crate::store::CounterStore;
use crate::subscriptions::{EmitReport, SubscriptionRegistry};

/// Default delay before an unacknowledged channel is activated.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Tunables for a broker instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Delay between registration and `init-complete` for clients that
    /// never send `ready`.
    pub settle_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Lifecycle state of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Opened, no identity yet.
    Connecting,
    /// Endpoint id assigned and registered.
    Registered,
    /// `init-complete` delivered.
    Active,
    /// Departed; the broker holds no state for it.
    Disconnected,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        })
    }
}

struct ChannelEntry {
    connection: Arc<ChannelConnection>,
    endpoint: Option<EndpointId>,
    state: ChannelState,
    settle: Option<CancellationToken>,
}

/// A single shared-state broker.
pub struct Broker {
    config: BrokerConfig,
    subscriptions: Arc<SubscriptionRegistry>,
    endpoints: EndpointRegistry,
    store: CounterStore,
    channels: Mutex<HashMap<ChannelId, ChannelEntry>>,
}

impl Broker {
    /// Create a broker with a zeroed counter and empty registries.
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        Arc::new(Self {
            config,
            endpoints: EndpointRegistry::new(subscriptions.clone()),
            store: CounterStore::new(subscriptions.clone()),
            subscriptions,
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Attach a channel: assign and register its endpoint identity and
    /// schedule activation after the settle delay.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(self: &Arc<Self>, connection: Arc<ChannelConnection>) -> EndpointId {
        let channel_id = connection.id.clone();
        {
            let mut channels = self.channels.lock();
            if let Some(existing) = channels.get(&channel_id).and_then(|e| e.endpoint.clone()) {
                return existing;
            }
            let _ = channels.insert(
                channel_id.clone(),
                ChannelEntry {
                    connection,
                    endpoint: None,
                    state: ChannelState::Connecting,
                    settle: None,
                },
            );
        }

        let endpoint = EndpointId::new();
        let settle = CancellationToken::new();
        {
            let mut channels = self.channels.lock();
            let Some(entry) = channels.get_mut(&channel_id) else {
                return endpoint;
            };
            entry.endpoint = Some(endpoint.clone());
            entry.state = ChannelState::Registered;
            entry.settle = Some(settle.clone());
        }
        info!(%channel_id, endpoint_id = %endpoint, "channel registered");

        if let Some(report) = self.endpoints.add(endpoint.clone()) {
            self.reap(report);
        }
        self.schedule_activation(channel_id, settle);
        endpoint
    }

    fn schedule_activation(self: &Arc<Self>, channel_id: ChannelId, settle: CancellationToken) {
        let broker: Weak<Self> = Arc::downgrade(self);
        let delay = self.config.settle_delay;
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = settle.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(broker) = broker.upgrade() {
                        let _ = broker.activate(&channel_id);
                    }
                }
            }
        });
    }

    /// Explicit handshake: activate the channel now.
    ///
    /// Delivers `init-complete` to the subscriptions the channel holds at
    /// this moment and cancels the settle timer. On an already active
    /// channel this only returns the endpoint id.
    pub fn ready(&self, channel_id: &ChannelId) -> Result<EndpointId> {
        self.activate(channel_id)
            .ok_or_else(|| BrokerError::NotRegistered(channel_id.clone()))
    }

    fn activate(&self, channel_id: &ChannelId) -> Option<EndpointId> {
        let endpoint = {
            let mut channels = self.channels.lock();
            let entry = channels.get_mut(channel_id)?;
            match entry.state {
                ChannelState::Registered => {
                    entry.state = ChannelState::Active;
                    if let Some(token) = entry.settle.take() {
                        token.cancel();
                    }
                    entry.endpoint.clone()?
                }
                ChannelState::Active => return entry.endpoint.clone(),
                ChannelState::Connecting | ChannelState::Disconnected => return None,
            }
        };

        debug!(%channel_id, endpoint_id = %endpoint, "channel active");
        let report = self
            .subscriptions
            .emit_to_owner(channel_id, &BrokerEvent::InitComplete(endpoint.clone()));
        self.reap(report);
        Some(endpoint)
    }

    /// Tear down everything the broker holds for a channel.
    ///
    /// Idempotent. Returns whether the channel was known.
    pub fn disconnect(&self, channel_id: &ChannelId) -> bool {
        let Some(entry) = self.channels.lock().remove(channel_id) else {
            return false;
        };
        if let Some(token) = entry.settle {
            token.cancel();
        }
        let removed = self.subscriptions.remove_owned_by(channel_id);
        info!(
            %channel_id,
            endpoint_id = entry.endpoint.as_ref().map(EndpointId::as_str),
            subscriptions_removed = removed,
            "channel disconnected"
        );
        if let Some(report) = entry.endpoint.as_ref().and_then(|e| self.endpoints.remove(e)) {
            self.reap(report);
        }
        true
    }

    /// Handle a departure notice for `endpoint_id`.
    ///
    /// If a channel owns that endpoint, the whole channel is torn down.
    /// Unknown endpoints are a no-op.
    pub fn notify_departure(&self, endpoint_id: &EndpointId) {
        let owner = self
            .channels
            .lock()
            .iter()
            .find(|(_, entry)| entry.endpoint.as_ref() == Some(endpoint_id))
            .map(|(id, _)| id.clone());

        match owner {
            Some(channel_id) => {
                let _ = self.disconnect(&channel_id);
            }
            None => {
                if let Some(report) = self.endpoints.remove(endpoint_id) {
                    self.reap(report);
                }
            }
        }
    }

    /// Disconnect every channel found closed during a delivery.
    fn reap(&self, report: EmitReport) {
        for channel_id in report.closed_owners {
            debug!(%channel_id, "reaping closed channel");
            let _ = self.disconnect(&channel_id);
        }
    }

    // ── Shared state ────────────────────────────────────────────────

    /// Current counter value.
    pub fn get_counter(&self) -> i64 {
        self.store.get()
    }

    /// Add `amount` to the counter and return the new value.
    pub fn increment_by(&self, amount: i64) -> i64 {
        let mutation = self.store.increment_by(amount);
        self.reap(mutation.report);
        mutation.value
    }

    /// Subtract one from the counter and return the new value.
    pub fn decrement(&self) -> i64 {
        let mutation = self.store.decrement();
        self.reap(mutation.report);
        mutation.value
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Subscribe `callback` to `event` on behalf of a registered channel.
    pub fn subscribe(
        &self,
        channel_id: &ChannelId,
        event: EventName,
        callback: Arc<dyn Callback>,
    ) -> Result<SubscriptionId> {
        if !self.is_registered(channel_id) {
            return Err(BrokerError::NotRegistered(channel_id.clone()));
        }
        Ok(self.subscriptions.subscribe(event, channel_id.clone(), callback))
    }

    /// Remove a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Live endpoint identities, sorted.
    pub fn list_endpoints(&self) -> Vec<EndpointId> {
        self.endpoints.snapshot()
    }

    /// Endpoint assigned to a channel, if it is still attached.
    pub fn endpoint_of(&self, channel_id: &ChannelId) -> Option<EndpointId> {
        self.channels.lock().get(channel_id).and_then(|e| e.endpoint.clone())
    }

    /// Lifecycle state of a channel. Unknown channels are `Disconnected`.
    pub fn channel_state(&self, channel_id: &ChannelId) -> ChannelState {
        self.channels
            .lock()
            .get(channel_id)
            .map_or(ChannelState::Disconnected, |e| e.state)
    }

    /// The connection object for an attached channel.
    pub fn connection(&self, channel_id: &ChannelId) -> Option<Arc<ChannelConnection>> {
        self.channels.lock().get(channel_id).map(|e| e.connection.clone())
    }

    /// Number of attached channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Number of live endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn is_registered(&self, channel_id: &ChannelId) -> bool {
        matches!(
            self.channel_state(channel_id),
            ChannelState::Registered | ChannelState::Active
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::from_fn;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    type Seen = Arc<Mutex<Vec<BrokerEvent>>>;

    fn channel() -> (Arc<ChannelConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(ChannelConnection::new(tx)), rx)
    }

    fn recorder() -> (Seen, Arc<dyn Callback>) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        (
            seen,
            from_fn(move |e| {
                s.lock().push(e.clone());
                Ok(())
            }),
        )
    }

    fn broker() -> Arc<Broker> {
        Broker::new(BrokerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn connect_registers_endpoint() {
        let broker = broker();
        let (conn, _rx) = channel();
        let id = conn.id.clone();

        let endpoint = broker.connect(conn);
        assert!(endpoint.starts_with("endpoint_"));
        assert_eq!(broker.list_endpoints(), vec![endpoint.clone()]);
        assert_eq!(broker.channel_state(&id), ChannelState::Registered);
        assert_eq!(broker.endpoint_of(&id), Some(endpoint));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_twice_returns_same_endpoint() {
        let broker = broker();
        let (conn, _rx) = channel();
        let first = broker.connect(conn.clone());
        let second = broker.connect(conn);
        assert_eq!(first, second);
        assert_eq!(broker.endpoint_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_delivers_init_complete_to_own_channel_only() {
        let broker = broker();
        let (a, _ra) = channel();
        let (b, _rb) = channel();
        let _ = broker.connect(a.clone());
        let _ = broker.connect(b.clone());
        tokio::time::advance(Duration::from_secs(1)).await;

        let (a_seen, a_cb) = recorder();
        let (b_seen, b_cb) = recorder();
        let _ = broker.subscribe(&a.id, EventName::InitComplete, a_cb).unwrap();
        let _ = broker.subscribe(&b.id, EventName::InitComplete, b_cb).unwrap();

        // Fresh channel, subscribed before its timer fires.
        let (c, _rc) = channel();
        let c_endpoint = broker.connect(c.clone());
        let (c_seen, c_cb) = recorder();
        let _ = broker.subscribe(&c.id, EventName::InitComplete, c_cb).unwrap();

        tokio::time::sleep(DEFAULT_SETTLE_DELAY + Duration::from_millis(10)).await;

        assert_eq!(*c_seen.lock(), vec![BrokerEvent::InitComplete(c_endpoint)]);
        assert!(a_seen.lock().is_empty());
        assert!(b_seen.lock().is_empty());
        assert_eq!(broker.channel_state(&c.id), ChannelState::Active);
        assert_eq!(broker.channel_state(&a.id), ChannelState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_activates_immediately_and_timer_does_not_repeat() {
        let broker = broker();
        let (conn, _rx) = channel();
        let endpoint = broker.connect(conn.clone());
        let (seen, cb) = recorder();
        let _ = broker.subscribe(&conn.id, EventName::InitComplete, cb).unwrap();

        assert_eq!(broker.ready(&conn.id).unwrap(), endpoint);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(broker.channel_state(&conn.id), ChannelState::Active);

        tokio::time::sleep(DEFAULT_SETTLE_DELAY * 2).await;
        assert_eq!(broker.ready(&conn.id).unwrap(), endpoint);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_unknown_channel_fails() {
        let broker = broker();
        assert_matches!(
            broker.ready(&ChannelId::from("channel_x")),
            Err(BrokerError::NotRegistered(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn departure_before_settle_delivers_nothing() {
        let broker = broker();
        let (conn, _rx) = channel();
        let endpoint = broker.connect(conn.clone());
        let (seen, cb) = recorder();
        let _ = broker.subscribe(&conn.id, EventName::InitComplete, cb).unwrap();

        broker.notify_departure(&endpoint);
        tokio::time::sleep(DEFAULT_SETTLE_DELAY * 2).await;

        assert!(seen.lock().is_empty());
        assert!(broker.list_endpoints().is_empty());
        assert_eq!(broker.subscription_count(), 0);
        assert_eq!(broker.channel_state(&conn.id), ChannelState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_removes_endpoint_and_subscriptions() {
        let broker = broker();
        let (a, _ra) = channel();
        let (b, _rb) = channel();
        let a_endpoint = broker.connect(a.clone());
        let b_endpoint = broker.connect(b.clone());

        let (_, cb) = recorder();
        let _ = broker.subscribe(&a.id, EventName::CounterChanged, cb).unwrap();
        let (b_seen, b_cb) = recorder();
        let _ = broker.subscribe(&b.id, EventName::EndpointSetChanged, b_cb).unwrap();

        assert!(broker.disconnect(&a.id));
        assert!(!broker.disconnect(&a.id));

        assert_eq!(broker.list_endpoints(), vec![b_endpoint.clone()]);
        assert_eq!(broker.subscription_count(), 1);
        assert_eq!(
            *b_seen.lock(),
            vec![BrokerEvent::EndpointSetChanged(vec![b_endpoint])]
        );
        assert!(!broker.list_endpoints().contains(&a_endpoint));
    }

    #[tokio::test(start_paused = true)]
    async fn notify_departure_unknown_is_noop() {
        let broker = broker();
        let (conn, _rx) = channel();
        let _ = broker.connect(conn);
        broker.notify_departure(&EndpointId::from("endpoint_ghost"));
        assert_eq!(broker.endpoint_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_requires_registration() {
        let broker = broker();
        let (conn, _rx) = channel();
        let (_, cb) = recorder();
        assert_matches!(
            broker.subscribe(&conn.id, EventName::CounterChanged, cb.clone()),
            Err(BrokerError::NotRegistered(_))
        );

        let endpoint = broker.connect(conn.clone());
        broker.notify_departure(&endpoint);
        assert_matches!(
            broker.subscribe(&conn.id, EventName::CounterChanged, cb),
            Err(BrokerError::NotRegistered(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shared_counter_scenario() {
        let broker = broker();
        let (a, _ra) = channel();
        let (b, _rb) = channel();
        let _ = broker.connect(a.clone());
        let _ = broker.connect(b.clone());

        let (b_seen, b_cb) = recorder();
        let _ = broker.subscribe(&b.id, EventName::CounterChanged, b_cb).unwrap();

        assert_eq!(broker.increment_by(123), 123);
        assert_eq!(*b_seen.lock(), vec![BrokerEvent::CounterChanged(123)]);

        let (c, _rc) = channel();
        let _ = broker.connect(c.clone());
        let (c_seen, c_cb) = recorder();
        let _ = broker.subscribe(&c.id, EventName::CounterChanged, c_cb).unwrap();
        assert!(c_seen.lock().is_empty());
        assert_eq!(broker.get_counter(), 123);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_is_reaped_on_delivery() {
        let broker = broker();
        let (live, _live_rx) = channel();
        let (dead, dead_rx) = channel();
        let _ = broker.connect(live.clone());
        let dead_endpoint = broker.connect(dead.clone());

        let cb = Arc::new(crate::callback::RemoteCallback::new(dead.clone(), "cb"));
        let _ = broker.subscribe(&dead.id, EventName::CounterChanged, cb).unwrap();
        drop(dead_rx);

        assert_eq!(broker.increment_by(1), 1);
        assert_eq!(broker.channel_state(&dead.id), ChannelState::Disconnected);
        assert!(!broker.list_endpoints().contains(&dead_endpoint));
        assert_eq!(broker.subscription_count(), 0);
        assert_eq!(broker.endpoint_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoints_after_connects_and_departures() {
        let broker = broker();
        let mut endpoints = Vec::new();
        let mut keep = Vec::new();
        for _ in 0..6 {
            let (conn, rx) = channel();
            endpoints.push(broker.connect(conn));
            keep.push(rx);
        }
        for departed in &endpoints[..2] {
            broker.notify_departure(departed);
        }
        broker.notify_departure(&endpoints[0]);

        let mut expected: Vec<EndpointId> = endpoints[2..].to_vec();
        expected.sort();
        assert_eq!(broker.list_endpoints(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn broker_outlives_all_channels() {
        let broker = broker();
        let (conn, _rx) = channel();
        let _ = broker.connect(conn.clone());
        let _ = broker.increment_by(9);
        let _ = broker.disconnect(&conn.id);

        assert_eq!(broker.channel_count(), 0);
        assert_eq!(broker.get_counter(), 9);
        assert_eq!(broker.decrement(), 8);
    }
}
