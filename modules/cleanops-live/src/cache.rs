use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use cleanops_common::{DashboardSnapshot, SnapshotDelta};
use serde::Serialize;
use tracing::debug;

/// One published dashboard view and the version it was published under.
/// Never mutated after publication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionedSnapshot {
    pub version: u64,
    pub snapshot: DashboardSnapshot,
}

/// Holds the current dashboard view behind an atomic pointer.
///
/// Reads are lock-free and always return a whole version. Writers are
/// serialized so each publish derives from the version before it.
pub struct SnapshotCache {
    inner: ArcSwap<VersionedSnapshot>,
    writer: Mutex<()>,
    recent_capacity: usize,
}

impl SnapshotCache {
    /// An empty cache at version 0.
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(VersionedSnapshot {
                version: 0,
                snapshot: DashboardSnapshot::default(),
            })),
            writer: Mutex::new(()),
            recent_capacity,
        }
    }

    /// The current version. Callers keep a consistent view even if a publish
    /// swaps in a newer one.
    pub fn current(&self) -> Arc<VersionedSnapshot> {
        self.inner.load_full()
    }

    pub fn version(&self) -> u64 {
        self.inner.load().version
    }

    pub fn recent_capacity(&self) -> usize {
        self.recent_capacity
    }

    /// Apply a delta to a copy of the current view and publish it as the next
    /// version.
    pub fn publish(&self, delta: &SnapshotDelta) -> Arc<VersionedSnapshot> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.inner.load_full();

        let mut snapshot = current.snapshot.clone();
        snapshot.apply(delta, self.recent_capacity);

        self.swap_in(current.version + 1, snapshot)
    }

    /// Publish a complete view as the next version, replacing whatever was
    /// there.
    pub fn seed(&self, mut snapshot: DashboardSnapshot) -> Arc<VersionedSnapshot> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.inner.load_full();
        snapshot.recent_runs.truncate(self.recent_capacity);
        self.swap_in(current.version + 1, snapshot)
    }

    fn swap_in(&self, version: u64, snapshot: DashboardSnapshot) -> Arc<VersionedSnapshot> {
        let next = Arc::new(VersionedSnapshot { version, snapshot });
        self.inner.store(next.clone());
        debug!(version, "Snapshot published");
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cleanops_common::SummaryDelta;

    fn delta(running: u64) -> SnapshotDelta {
        let mut delta = SnapshotDelta::new(running, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        delta.summary = SummaryDelta {
            running_pipelines: Some(running),
            ..SummaryDelta::default()
        };
        delta
    }

    #[test]
    fn versions_increase_by_one() {
        let cache = SnapshotCache::new(10);
        assert_eq!(cache.version(), 0);

        let versions: Vec<u64> = (1..=5).map(|i| cache.publish(&delta(i)).version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(cache.current().snapshot.summary.running_pipelines, 5);
    }

    #[test]
    fn held_snapshot_is_unaffected_by_later_publish() {
        let cache = SnapshotCache::new(10);
        cache.publish(&delta(1));
        let held = cache.current();

        cache.publish(&delta(2));

        assert_eq!(held.version, 1);
        assert_eq!(held.snapshot.summary.running_pipelines, 1);
        assert_eq!(cache.current().snapshot.summary.running_pipelines, 2);
    }

    #[test]
    fn seed_replaces_view_as_next_version() {
        let cache = SnapshotCache::new(10);
        cache.publish(&delta(3));

        let mut view = DashboardSnapshot::default();
        view.summary.total_pipelines = 7;
        let seeded = cache.seed(view);

        assert_eq!(seeded.version, 2);
        assert_eq!(seeded.snapshot.summary.total_pipelines, 7);
        assert_eq!(seeded.snapshot.summary.running_pipelines, 0);
    }
}
