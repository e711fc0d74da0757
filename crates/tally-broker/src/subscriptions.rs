//! Subscription registry: who wants which event, and delivery to them.
//!
//! Subscriptions are stored by id, with secondary indexes by event name
//! (in subscription order) and by owning channel. Emission snapshots the
//! matching subscriptions under the lock, releases it, then invokes each
//! callback, so callbacks may subscribe or unsubscribe re-entrantly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tally_core::{BrokerEvent, ChannelError, ChannelId, EventName, SubscriptionId};
use tracing::{debug, warn};

use crate::callback::Callback;

/// A registered interest in one event.
#[derive(Clone)]
pub struct Subscription {
    /// Handle returned to the subscriber.
    pub id: SubscriptionId,
    /// Event this subscription listens to.
    pub event: EventName,
    /// Channel that created the subscription.
    pub owner: ChannelId,
    callback: Arc<dyn Callback>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Outcome of one emission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Callbacks that accepted the event.
    pub delivered: usize,
    /// Callbacks that failed.
    pub failed: usize,
    /// Owners whose channel reported closed during delivery.
    pub closed_owners: Vec<ChannelId>,
}

impl EmitReport {
    fn record_failure(&mut self, owner: &ChannelId, error: &ChannelError) {
        self.failed += 1;
        if error.is_closed() && !self.closed_owners.contains(owner) {
            self.closed_owners.push(owner.clone());
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: EmitReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        for owner in other.closed_owners {
            if !self.closed_owners.contains(&owner) {
                self.closed_owners.push(owner);
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<SubscriptionId, Subscription>,
    by_event: HashMap<EventName, Vec<SubscriptionId>>,
    by_owner: HashMap<ChannelId, HashSet<SubscriptionId>>,
}

impl Inner {
    fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let sub = self.by_id.remove(id)?;
        if let Some(ids) = self.by_event.get_mut(&sub.event) {
            ids.retain(|s| s != id);
            if ids.is_empty() {
                let _ = self.by_event.remove(&sub.event);
            }
        }
        if let Some(ids) = self.by_owner.get_mut(&sub.owner) {
            let _ = ids.remove(id);
            if ids.is_empty() {
                let _ = self.by_owner.remove(&sub.owner);
            }
        }
        Some(sub)
    }
}

/// Registry of live subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event` on behalf of `owner`.
    pub fn subscribe(
        &self,
        event: EventName,
        owner: ChannelId,
        callback: Arc<dyn Callback>,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        let mut inner = self.inner.lock();
        inner.by_event.entry(event).or_default().push(id.clone());
        let _ = inner.by_owner.entry(owner.clone()).or_default().insert(id.clone());
        let _ = inner.by_id.insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                event,
                owner,
                callback,
            },
        );
        debug!(subscription_id = %id, %event, "subscribed");
        id
    }

    /// Remove one subscription. Unknown ids are a no-op.
    ///
    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = self.inner.lock().remove(id).is_some();
        if removed {
            debug!(subscription_id = %id, "unsubscribed");
        }
        removed
    }

    /// Remove every subscription created by `owner`.
    ///
    /// Returns the number removed.
    pub fn remove_owned_by(&self, owner: &ChannelId) -> usize {
        let mut inner = self.inner.lock();
        let Some(ids) = inner.by_owner.remove(owner) else {
            return 0;
        };
        for id in &ids {
            let _ = inner.remove(id);
        }
        ids.len()
    }

    /// Deliver `event` to every matching subscription.
    pub fn emit(&self, event: &BrokerEvent) -> EmitReport {
        let targets = self.snapshot(event.name(), None);
        self.deliver(event, targets)
    }

    /// Deliver `event` only to matching subscriptions owned by `owner`.
    pub fn emit_to_owner(&self, owner: &ChannelId, event: &BrokerEvent) -> EmitReport {
        let targets = self.snapshot(event.name(), Some(owner));
        self.deliver(event, targets)
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.inner.lock().by_id.contains_key(id)
    }

    /// Look up a subscription.
    pub fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.inner.lock().by_id.get(id).cloned()
    }

    /// Total live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    /// Whether there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live subscriptions for one event.
    pub fn count_for(&self, event: EventName) -> usize {
        self.inner.lock().by_event.get(&event).map_or(0, Vec::len)
    }

    /// Live subscriptions owned by one channel.
    pub fn count_owned_by(&self, owner: &ChannelId) -> usize {
        self.inner.lock().by_owner.get(owner).map_or(0, HashSet::len)
    }

    fn snapshot(&self, event: EventName, owner: Option<&ChannelId>) -> Vec<Subscription> {
        let inner = self.inner.lock();
        let Some(ids) = inner.by_event.get(&event) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|sub| owner.is_none_or(|o| &sub.owner == o))
            .cloned()
            .collect()
    }

    fn deliver(&self, event: &BrokerEvent, targets: Vec<Subscription>) -> EmitReport {
        let name = event.name();
        counter!("broker_emissions_total", "event" => name.as_str()).increment(1);

        let mut report = EmitReport::default();
        for sub in targets {
            // Skip subscriptions removed by an earlier callback in this pass.
            if !self.contains(&sub.id) {
                continue;
            }
            match sub.callback.invoke(event) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    counter!("broker_delivery_failures_total", "event" => name.as_str()).increment(1);
                    warn!(
                        subscription_id = %sub.id,
                        owner = %sub.owner,
                        event = %name,
                        %error,
                        "callback delivery failed"
                    );
                    report.record_failure(&sub.owner, &error);
                }
            }
        }
        debug!(event = %name, delivered = report.delivered, failed = report.failed, "emitted");
        report
    }
}
