/// Coordinator counters
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SyncMetrics {
    pub operations_pushed: AtomicU64,
    pub operations_applied: AtomicU64,
    pub conflicts_detected: AtomicU64,
    pub conflicts_resolved: AtomicU64,
    pub conflicts_blocked: AtomicU64,
    pub invalid_operations: AtomicU64,
    pub permission_denied: AtomicU64,
    pub persistence_errors: AtomicU64,
    pub apply_errors: AtomicU64,
    pub commits: AtomicU64,
    pub commit_errors: AtomicU64,
    pub events_dropped: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub operations_pushed: u64,
    pub operations_applied: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub conflicts_blocked: u64,
    pub invalid_operations: u64,
    pub permission_denied: u64,
    pub persistence_errors: u64,
    pub apply_errors: u64,
    pub commits: u64,
    pub commit_errors: u64,
    pub events_dropped: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            operations_pushed: read(&self.operations_pushed),
            operations_applied: read(&self.operations_applied),
            conflicts_detected: read(&self.conflicts_detected),
            conflicts_resolved: read(&self.conflicts_resolved),
            conflicts_blocked: read(&self.conflicts_blocked),
            invalid_operations: read(&self.invalid_operations),
            permission_denied: read(&self.permission_denied),
            persistence_errors: read(&self.persistence_errors),
            apply_errors: read(&self.apply_errors),
            commits: read(&self.commits),
            commit_errors: read(&self.commit_errors),
            events_dropped: read(&self.events_dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = SyncMetrics::new();
        SyncMetrics::incr(&metrics.operations_pushed);
        SyncMetrics::incr(&metrics.operations_pushed);
        SyncMetrics::add(&metrics.events_dropped, 3);
        SyncMetrics::add(&metrics.events_dropped, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations_pushed, 2);
        assert_eq!(snapshot.events_dropped, 3);
        assert_eq!(snapshot.commits, 0);
    }
}
