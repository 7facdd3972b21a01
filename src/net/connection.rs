//! Connection ids and in-flight client accounting.
//!
//! Ids are process-wide and shared by client and backend sockets. The pool
//! uses a backend connection's id to recognise failure reports about a
//! connection it has already replaced.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::observability::metrics;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id; ids are never reused within a process.
    pub fn new() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

/// Counts client tasks still running so shutdown can drain them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    in_flight: Arc<InFlight>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client task; the returned guard unregisters it on drop.
    pub fn track(&self) -> ConnectionGuard {
        let now = self.in_flight.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_connections(now);
        ConnectionGuard {
            in_flight: Arc::clone(&self.in_flight),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Resolve once no client task is registered.
    pub async fn wait_idle(&self) {
        loop {
            let drained = self.in_flight.drained.notified();
            tokio::pin!(drained);
            // Register before checking so a concurrent last drop cannot be missed.
            drained.as_mut().enable();
            if self.active_count() == 0 {
                return;
            }
            drained.await;
        }
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    in_flight: Arc<InFlight>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let left = self.in_flight.count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_active_connections(left);
        if left == 0 {
            self.in_flight.drained.notify_waiters();
        }
        tracing::trace!(connection = %self.id, "Client task finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ids_increase_and_never_repeat() {
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        assert!(second > first);
        assert_eq!(first.to_string(), format!("conn-{}", first.as_u64()));
    }

    #[test]
    fn guards_adjust_in_flight_count() {
        let tracker = ConnectionTracker::new();
        let a = tracker.track();
        let b = tracker.clone().track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(a.id(), b.id());

        drop(b);
        assert_eq!(tracker.active_count(), 1);
        drop(a);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn idle_tracker_does_not_wait() {
        tokio::time::timeout(Duration::from_millis(50), ConnectionTracker::new().wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_idle_returns_once_last_guard_drops() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
