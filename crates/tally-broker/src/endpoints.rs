//! Live set of endpoint identities.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tally_core::{BrokerEvent, EndpointId};
use tracing::debug;

use crate::subscriptions::{EmitReport, SubscriptionRegistry};

/// Tracks connected endpoints and announces membership changes.
///
/// Every change emits `endpoint-set-changed` with the full, sorted set.
/// The emission happens while the set is still locked, so subscribers see
/// snapshots in the order the changes happened.
pub struct EndpointRegistry {
    endpoints: Mutex<BTreeSet<EndpointId>>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl EndpointRegistry {
    /// Create an empty registry emitting through `subscriptions`.
    pub fn new(subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self {
            endpoints: Mutex::new(BTreeSet::new()),
            subscriptions,
        }
    }

    /// Add an endpoint. Returns `None` if it was already present.
    pub fn add(&self, id: EndpointId) -> Option<EmitReport> {
        let mut endpoints = self.endpoints.lock();
        if !endpoints.insert(id.clone()) {
            return None;
        }
        debug!(endpoint_id = %id, total = endpoints.len(), "endpoint added");
        Some(self.announce(&endpoints))
    }

    /// Remove an endpoint. Returns `None` if it was not present.
    pub fn remove(&self, id: &EndpointId) -> Option<EmitReport> {
        let mut endpoints = self.endpoints.lock();
        if !endpoints.remove(id) {
            return None;
        }
        debug!(endpoint_id = %id, total = endpoints.len(), "endpoint removed");
        Some(self.announce(&endpoints))
    }

    /// Current live set, sorted.
    pub fn snapshot(&self) -> Vec<EndpointId> {
        self.endpoints.lock().iter().cloned().collect()
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &EndpointId) -> bool {
        self.endpoints.lock().contains(id)
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Whether no endpoints are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn announce(&self, endpoints: &BTreeSet<EndpointId>) -> EmitReport {
        let snapshot = endpoints.iter().cloned().collect();
        self.subscriptions.emit(&BrokerEvent::EndpointSetChanged(snapshot))
    }
}
