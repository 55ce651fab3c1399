//! Registries of live pointer slots.
//!
//! Two unordered sets of head addresses, one per slot kind. Slots attach on
//! construction and detach on destruction regardless of where their storage
//! lives; both operations are O(1). The sets are only iterated during a
//! collection snapshot, under the graph's joint lock.

use rustc_hash::FxHashSet;

use crate::slot::{ObservingRef, OwningRef};

/// The live-slot registry.
#[derive(Default)]
pub(crate) struct SlotRegistry {
    owning: FxHashSet<OwningRef>,
    observing: FxHashSet<ObservingRef>,
}

impl SlotRegistry {
    /// Create a registry with pre-reserved capacity for each slot kind.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            owning: FxHashSet::with_capacity_and_hasher(capacity, Default::default()),
            observing: FxHashSet::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Register an owning slot. Attaching the same slot twice is a usage
    /// error.
    pub fn attach_owning(&mut self, slot: OwningRef) {
        let inserted = self.owning.insert(slot);
        debug_assert!(inserted, "owning slot attached twice");
    }

    /// Deregister an owning slot. Detaching a slot that is not attached is
    /// a usage error.
    pub fn detach_owning(&mut self, slot: OwningRef) {
        let removed = self.owning.remove(&slot);
        debug_assert!(removed, "owning slot detached while not attached");
    }

    /// Register an observing slot.
    pub fn attach_observing(&mut self, slot: ObservingRef) {
        let inserted = self.observing.insert(slot);
        debug_assert!(inserted, "observing slot attached twice");
    }

    /// Deregister an observing slot.
    pub fn detach_observing(&mut self, slot: ObservingRef) {
        let removed = self.observing.remove(&slot);
        debug_assert!(removed, "observing slot detached while not attached");
    }

    /// Iterate the owning slots. Snapshot-only.
    pub fn owning(&self) -> impl Iterator<Item = OwningRef> + '_ {
        self.owning.iter().copied()
    }

    /// Iterate the observing slots. Snapshot-only.
    pub fn observing(&self) -> impl Iterator<Item = ObservingRef> + '_ {
        self.observing.iter().copied()
    }

    /// Number of registered slots of both kinds.
    pub fn len(&self) -> usize {
        self.owning.len() + self.observing.len()
    }
}
