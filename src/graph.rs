//! The collector graph.
//!
//! A process-wide structure holding the address-interval index, the slot
//! registries, the pending-release pool, and the reusable trace buffers.
//! Two mutexes protect the shared state: one for the range index, one for
//! the registries. Every individual mutation is serialized; a collection
//! pass acquires both jointly to build its snapshot, then marks and sweeps
//! without any lock held.
//!
//! The graph is a singleton, lazily constructed on first access and never
//! torn down: at process exit it leaks uncollected cycles and orphans
//! surviving slots. Teardown order over arbitrary cycles is undefined, so
//! none is attempted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::collector::TraceScratch;
use crate::config::GraphConfig;
use crate::garbage::Garbage;
use crate::range::RangeIndex;
use crate::registry::SlotRegistry;
use crate::slot::{ObservingRef, OwningRef, Parked, StrongRef};
use crate::stats::GraphStats;

/// The collector graph. See the module documentation for the locking model.
pub struct Graph {
    /// Live allocation ranges, sorted and disjoint.
    ranges: Mutex<RangeIndex>,
    /// Live pointer slots of both kinds.
    registry: Mutex<SlotRegistry>,
    /// Strong references parked for deferred release; drained into the next
    /// collection's batch.
    pending: Mutex<Vec<Parked>>,
    /// Reusable trace buffers. Uncontended: guarded by `collecting`.
    scratch: Mutex<TraceScratch>,
    /// Re-entrancy guard for `collect`.
    collecting: AtomicBool,
    /// Counters.
    stats: GraphStats,
}

impl Graph {
    fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    fn with_config(config: GraphConfig) -> Self {
        config.validate().expect("invalid graph configuration");

        Self {
            ranges: Mutex::new(RangeIndex::with_capacity(config.range_capacity)),
            registry: Mutex::new(SlotRegistry::with_capacity(config.slot_capacity)),
            pending: Mutex::new(Vec::with_capacity(config.slot_capacity)),
            scratch: Mutex::new(TraceScratch::with_capacity(
                config.range_capacity,
                config.slot_capacity,
            )),
            collecting: AtomicBool::new(false),
            stats: GraphStats::new(),
        }
    }

    // =========================================================================
    // Range index
    // =========================================================================

    /// Register the byte interval of a new managed allocation.
    pub(crate) fn add_range(&self, begin: usize, size: usize) {
        trace!(begin, size, "add range");
        self.ranges.lock().insert(begin, size);
    }

    /// Deregister an allocation's interval. Called from allocation
    /// destructors; removing an absent range is a usage error.
    pub(crate) fn remove_range(&self, begin: usize) {
        trace!(begin, "remove range");
        self.ranges.lock().remove(begin);
    }

    // =========================================================================
    // Slot registry
    // =========================================================================

    pub(crate) fn attach_owning(&self, slot: OwningRef) {
        self.registry.lock().attach_owning(slot);
    }

    pub(crate) fn attach_observing(&self, slot: ObservingRef) {
        self.registry.lock().attach_observing(slot);
    }

    pub(crate) fn detach_observing(&self, slot: ObservingRef) {
        self.registry.lock().detach_observing(slot);
    }

    /// Re-aim an observing head, under the registry lock so a concurrent
    /// snapshot can never observe a half-written slot.
    pub(crate) fn retarget_observing(&self, head: &crate::slot::ObservingHead, target: *const ()) {
        let _registry = self.registry.lock();
        head.set_target(target);
    }

    /// Rewrite an owning head in place, under the registry lock so a
    /// concurrent snapshot can never observe a half-written slot. The
    /// previous reference, if any, is parked for deferred release.
    pub(crate) fn rewrite_owning(
        &self,
        head: &crate::slot::OwningHead,
        strong: Option<StrongRef>,
        target: *const (),
    ) {
        let previous = {
            let _registry = self.registry.lock();
            unsafe { head.replace(strong, target) }
        };
        self.park_previous(previous);
    }

    /// Detach an owning head and park whatever reference it still holds.
    /// Called from owning-slot destructors; also used for occupied slots
    /// that were never attached (their reference still must not be dropped
    /// in place).
    pub(crate) fn release_owning(&self, head: &crate::slot::OwningHead) {
        let previous = {
            let mut registry = self.registry.lock();
            if head.is_attached() {
                registry.detach_owning(OwningRef(head));
                head.set_attached(false);
            }
            let target = head.target();
            (unsafe { head.take_strong() }, target)
        };
        self.park_previous(previous);
    }

    fn park_previous(&self, (strong, target): (Option<StrongRef>, *const ())) {
        if let Some(strong) = strong {
            self.pending.lock().push(Parked {
                strong,
                target: target as usize,
            });
        }
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Run one full stop-the-world trace and return the batch of
    /// unreachable objects.
    ///
    /// Re-entered while another collection is in progress (on this or any
    /// other thread), it returns an empty batch immediately; no waiting, no
    /// queuing.
    pub fn collect(&self) -> Garbage {
        if self.collecting.swap(true, Ordering::AcqRel) {
            debug!("collection already in progress");
            self.stats.record_skipped();
            return Garbage::empty();
        }

        let start = Instant::now();
        let mut scratch = self.scratch.lock();
        let mut refs: Vec<StrongRef> = Vec::new();

        {
            // Joint lock: the snapshot sees a consistent graph. Range lock
            // first, then registry, matching every other multi-lock path.
            let ranges = self.ranges.lock();
            let registry = self.registry.lock();

            refs.reserve(registry.len());
            for range in ranges.iter() {
                scratch.push_range(range.begin, range.end);
            }

            // Safety: registered heads stay valid between attach and
            // detach, and both happen under the registry lock we hold.
            for slot in registry.owning() {
                let head = unsafe { &*slot.0 };
                if !head.is_occupied() {
                    continue;
                }
                let Some(range) = ranges.locate(head.target() as usize) else {
                    debug_assert!(false, "owning slot target outside every range");
                    continue;
                };
                let is_root = ranges.locate(slot.addr()).is_none();
                scratch.push_owning_record(slot.addr(), slot, range as u32, is_root);
            }

            for slot in registry.observing() {
                let head = unsafe { &*slot.0 };
                // Null, dangling-before-management, and external targets
                // are all ignored.
                let Some(range) = ranges.locate(head.target() as usize) else {
                    continue;
                };
                let is_root = ranges.locate(slot.addr()).is_none();
                scratch.push_observing_record(slot.addr(), range as u32, is_root);
            }

            let mut pending = self.pending.lock();
            for parked in pending.drain(..) {
                match ranges.locate(parked.target) {
                    Some(range) => scratch.push_parked_target(range as u32),
                    // A parked reference keeps its allocation (and thus its
                    // range) alive, so the lookup cannot miss.
                    None => debug_assert!(false, "parked reference target outside every range"),
                }
                refs.push(parked.strong);
            }
        }

        scratch.mark();
        // Safety: every head still referenced from the scan-set lives
        // inside an unreachable allocation, which only this batch can free.
        let objects = unsafe { scratch.sweep(&mut refs) };
        scratch.clear();
        drop(scratch);

        self.collecting.store(false, Ordering::Release);

        let elapsed = start.elapsed();
        self.stats.record_collection(objects, refs.len(), elapsed);
        debug!(
            objects,
            refs = refs.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "collection complete"
        );

        Garbage::new(refs, objects)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// The allocation range containing `addr`, if any.
    ///
    /// Containment uses the index's inclusive upper bound: an address one
    /// past the end of an allocation still attributes to it.
    pub fn find_range(&self, addr: usize) -> Option<crate::range::MemoryRange> {
        self.ranges.lock().find(addr)
    }

    /// Number of live managed allocations.
    pub fn allocated_objects(&self) -> usize {
        self.ranges.lock().len()
    }

    /// Total bytes across live managed allocations.
    pub fn allocated_bytes(&self) -> usize {
        self.ranges.lock().total_bytes()
    }

    /// Collector activity counters.
    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }
}

// =============================================================================
// Global graph access
// =============================================================================

static GRAPH: OnceLock<Graph> = OnceLock::new();

/// The process-wide collector graph.
pub fn graph() -> &'static Graph {
    GRAPH.get_or_init(Graph::new)
}

/// Initialize the global graph with a non-default configuration.
///
/// Must run before the first allocation or collection; returns `false` if
/// the graph already exists, in which case the configuration is discarded.
pub fn init(config: GraphConfig) -> bool {
    GRAPH.set(Graph::with_config(config)).is_ok()
}

/// Run one collection on the global graph. See [`Graph::collect`].
pub fn collect() -> Garbage {
    graph().collect()
}

/// Number of live managed allocations in the global graph.
pub fn allocated_objects() -> usize {
    graph().allocated_objects()
}

/// Total bytes across live managed allocations in the global graph.
pub fn allocated_bytes() -> usize {
    graph().allocated_bytes()
}
