//! The shared counter.

use std::sync::Arc;

use parking_lot::Mutex;
use tally_core::BrokerEvent;
use tracing::debug;

use crate::subscriptions::{EmitReport, SubscriptionRegistry};

/// Result of a counter mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    /// Counter value after the mutation.
    pub value: i64,
    /// Delivery outcome of the `counter-changed` emission.
    pub report: EmitReport,
}

/// Owns the counter and emits `counter-changed` after every mutation.
///
/// Mutate-then-emit runs under one lock: the emitted value is always the
/// stored value, and emissions reach subscribers in mutation order.
/// Arithmetic saturates at the `i64` bounds.
pub struct CounterStore {
    value: Mutex<i64>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl CounterStore {
    /// Create a counter starting at zero.
    pub fn new(subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self::with_initial(0, subscriptions)
    }

    /// Create a counter starting at `initial`.
    pub fn with_initial(initial: i64, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self {
            value: Mutex::new(initial),
            subscriptions,
        }
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        *self.value.lock()
    }

    /// Add `amount` (zero still emits).
    pub fn increment_by(&self, amount: i64) -> Mutation {
        self.apply(|v| v.saturating_add(amount))
    }

    /// Subtract one.
    pub fn decrement(&self) -> Mutation {
        self.apply(|v| v.saturating_sub(1))
    }

    fn apply(&self, f: impl FnOnce(i64) -> i64) -> Mutation {
        let mut value = self.value.lock();
        *value = f(*value);
        let new_value = *value;
        debug!(value = new_value, "counter changed");
        let report = self.subscriptions.emit(&BrokerEvent::CounterChanged(new_value));
        Mutation {
            value: new_value,
            report,
        }
    }
}
