//! Live WebSocket connection tracking.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tally_broker::ChannelConnection;
use tally_core::ChannelId;

/// Every WebSocket channel currently attached to the gateway.
///
/// Used for the connection limit and `/health`, independent of which
/// broker each channel is attached to.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ChannelId, Arc<ChannelConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Track a connection.
    pub fn add(&self, connection: Arc<ChannelConnection>) {
        let _ = self.connections.write().insert(connection.id.clone(), connection);
    }

    /// Stop tracking a connection.
    pub fn remove(&self, channel_id: &ChannelId) -> bool {
        self.connections.write().remove(channel_id).is_some()
    }

    /// Number of tracked connections.
    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Total frames dropped to backpressure across live connections.
    pub fn dropped_frames(&self) -> u64 {
        self.connections.read().values().map(|c| c.drop_count()).sum()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_connection() -> (Arc<ChannelConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(1);
        (Arc::new(ChannelConnection::new(tx)), rx)
    }

    #[test]
    fn add_and_remove() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = make_connection();
        let (b, _rb) = make_connection();
        reg.add(a.clone());
        reg.add(b);
        assert_eq!(reg.count(), 2);
        assert!(reg.remove(&a.id));
        assert!(!reg.remove(&a.id));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn dropped_frames_are_summed() {
        let reg = ConnectionRegistry::default();
        let (a, _ra) = make_connection();
        reg.add(a.clone());
        a.send(Arc::new("one".into())).unwrap();
        assert!(a.send(Arc::new("two".into())).is_err());
        assert_eq!(reg.dropped_frames(), 1);
    }
}
