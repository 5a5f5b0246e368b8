//! Connection ids and the active-connection gauge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metrics;

/// Hands out connection ids and counts live connections.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    active: AtomicU64,
    last_id: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and return a guard that deregisters on drop.
    pub fn register(&self) -> ConnectionGuard {
        let id = self.inner.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let active = self.inner.active.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_connection_accepted();
        metrics::set_active_connections(active);

        ConnectionGuard {
            tracker: self.clone(),
            id,
        }
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.inner.active.load(Ordering::Relaxed)
    }

    fn unregister(&self) {
        let result = self
            .inner
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |curr| {
                curr.checked_sub(1)
            });

        match result {
            Ok(prev) => metrics::set_active_connections(prev - 1),
            Err(_) => {
                tracing::error!("Connection released with active count already at 0");
                metrics::set_active_connections(0);
            }
        }
    }
}

/// RAII guard for one connection's lifetime.
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: u64,
}

impl ConnectionGuard {
    /// Get the connection ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_connections(), 0);

        let guard1 = tracker.register();
        let guard2 = tracker.register();
        assert_eq!(tracker.active_connections(), 2);
        assert_eq!(guard1.id(), 1);
        assert_eq!(guard2.id(), 2);

        drop(guard1);
        assert_eq!(tracker.active_connections(), 1);

        drop(guard2);
        assert_eq!(tracker.active_connections(), 0);

        assert_eq!(tracker.register().id(), 3);
    }
}
