//! Collection statistics.
//!
//! Counters are atomics updated outside the graph locks; readers may see
//! values that are momentarily inconsistent with each other. Informational
//! only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Statistics about collector activity.
#[derive(Debug, Default)]
pub struct GraphStats {
    /// Completed collection passes.
    pub collections: AtomicU64,
    /// Collection attempts that lost the re-entrancy race and returned an
    /// empty batch.
    pub collections_skipped: AtomicU64,
    /// Allocations condemned across all passes.
    pub objects_released: AtomicU64,
    /// Strong references handed to garbage batches across all passes.
    pub refs_released: AtomicU64,
    /// Total time spent inside `collect` (nanoseconds), locks and marking
    /// included, batch destruction excluded.
    pub pause_time_ns: AtomicU64,
}

impl GraphStats {
    pub(crate) const fn new() -> Self {
        Self {
            collections: AtomicU64::new(0),
            collections_skipped: AtomicU64::new(0),
            objects_released: AtomicU64::new(0),
            refs_released: AtomicU64::new(0),
            pause_time_ns: AtomicU64::new(0),
        }
    }

    /// Record one completed pass.
    pub(crate) fn record_collection(&self, objects: usize, refs: usize, elapsed: Duration) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.objects_released
            .fetch_add(objects as u64, Ordering::Relaxed);
        self.refs_released.fetch_add(refs as u64, Ordering::Relaxed);
        self.pause_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.collections_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total time spent collecting.
    pub fn total_pause(&self) -> Duration {
        Duration::from_nanos(self.pause_time_ns.load(Ordering::Relaxed))
    }

    /// Average pause per completed pass.
    pub fn avg_pause(&self) -> Duration {
        let count = self.collections.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.pause_time_ns.load(Ordering::Relaxed) / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_recording() {
        let stats = GraphStats::new();

        stats.record_collection(3, 5, Duration::from_micros(100));
        stats.record_collection(0, 0, Duration::from_micros(300));

        assert_eq!(stats.collections.load(Ordering::Relaxed), 2);
        assert_eq!(stats.objects_released.load(Ordering::Relaxed), 3);
        assert_eq!(stats.refs_released.load(Ordering::Relaxed), 5);
        assert_eq!(stats.avg_pause(), Duration::from_micros(200));
    }

    #[test]
    fn test_avg_pause_with_no_collections() {
        let stats = GraphStats::new();
        assert_eq!(stats.avg_pause(), Duration::ZERO);
    }
}
