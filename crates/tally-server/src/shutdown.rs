//! Graceful shutdown: stop accepting, close every session, wait for
//! teardown.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{info, warn};

/// Upper bound on how long [`ShutdownCoordinator::drain`] waits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates shutdown of the listener and every live session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Guard held by a session for as long as it runs.
    pub fn session_guard(&self) -> TaskTrackerToken {
        self.sessions.token()
    }

    /// Sessions that have not finished teardown.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down, then wait for `listener` and every session to finish.
    ///
    /// Returns `false` if something was still running after the drain
    /// timeout.
    pub async fn drain(&self, listener: JoinHandle<()>) -> bool {
        self.drain_within(listener, DRAIN_TIMEOUT).await
    }

    async fn drain_within(&self, listener: JoinHandle<()>, limit: Duration) -> bool {
        self.shutdown();
        let _ = self.sessions.close();
        info!(sessions = self.live_sessions(), "draining sessions");

        let wait = async {
            let _ = listener.await;
            self.sessions.wait().await;
        };
        if tokio::time::timeout(limit, wait).await.is_err() {
            warn!(sessions = self.live_sessions(), "shutdown timed out after {limit:?}");
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_cancels_every_token() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[test]
    fn guards_count_live_sessions() {
        let coord = ShutdownCoordinator::new();
        let a = coord.session_guard();
        let b = coord.session_guard();
        assert_eq!(coord.live_sessions(), 2);
        drop(a);
        drop(b);
        assert_eq!(coord.live_sessions(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_listener_and_sessions() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let listener = tokio::spawn(async move { token.cancelled().await });

        let guard = coord.session_guard();
        let token = coord.token();
        let _session = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        assert!(coord.drain(listener).await);
        assert_eq!(coord.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_a_stuck_session() {
        let coord = ShutdownCoordinator::new();
        let listener = tokio::spawn(async {});
        let _stuck = coord.session_guard();

        assert!(!coord.drain_within(listener, Duration::from_millis(50)).await);
        assert_eq!(coord.live_sessions(), 1);
    }
}
