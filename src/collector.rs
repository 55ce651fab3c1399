//! Mark/sweep machinery over a collection snapshot.
//!
//! A collection pass works on transient per-trace data: a mirror of the
//! range index with mark bits, one scan record per participating slot, and
//! two disjoint index sets (`keep` and `scan`). The snapshot is built under
//! the graph's joint lock; marking and sweeping then run over the snapshot
//! without any lock held.
//!
//! The mark pass needs no type information at all: a record moves from
//! `scan` to `keep` exactly when its slot's *storage address* falls inside
//! a range already known reachable.

use crate::slot::{OwningRef, StrongRef};

/// Per-trace annotation of one allocation range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RangeMark {
    /// First byte of the mirrored allocation.
    pub begin: usize,
    /// One past the last byte.
    pub end: usize,
    /// At least one owning slot points into this range.
    pub managed: bool,
    /// The range's interior has been folded into the keep-set.
    pub scanned: bool,
    /// A kept owning slot targets this range: a strong reference survives
    /// the pass, so the allocation cannot die with this batch.
    pub retained: bool,
    /// Not retained, and at least one released reference targets it; the
    /// allocation will be freed when the garbage batch drops.
    pub condemned: bool,
}

/// Per-trace entry for one registered slot whose referent lies inside a
/// known range.
#[derive(Clone, Copy)]
pub(crate) struct ScanRecord {
    /// Address of the slot's own storage; decides root vs. interior and
    /// routes reachability during marking.
    pub slot_addr: usize,
    /// Index into the range mirror of the range containing the referent.
    pub range: u32,
    /// Back-pointer to the owning head, for sweep extraction. `None` for
    /// observing slots.
    pub owning: Option<OwningRef>,
}

/// Reusable trace buffers.
///
/// Reserved once at graph construction and cleared (never shrunk) between
/// passes, so steady-state collection does not allocate.
pub(crate) struct TraceScratch {
    /// Mirror of the range index, with mark bits.
    rngs: Vec<RangeMark>,
    /// All scan records of the current pass.
    info: Vec<ScanRecord>,
    /// Indices of records not yet proven reachable.
    scan: Vec<u32>,
    /// Indices of reachable records; grows as a work list during marking.
    keep: Vec<u32>,
    /// Range indices targeted by strong references parked for deferred
    /// release.
    parked_targets: Vec<u32>,
}

impl TraceScratch {
    pub fn with_capacity(range_capacity: usize, slot_capacity: usize) -> Self {
        Self {
            rngs: Vec::with_capacity(range_capacity),
            info: Vec::with_capacity(slot_capacity),
            scan: Vec::with_capacity(slot_capacity),
            keep: Vec::with_capacity(slot_capacity),
            parked_targets: Vec::with_capacity(slot_capacity),
        }
    }

    /// Drop all per-trace state, retaining capacity.
    pub fn clear(&mut self) {
        self.rngs.clear();
        self.info.clear();
        self.scan.clear();
        self.keep.clear();
        self.parked_targets.clear();
    }

    // =========================================================================
    // Snapshot construction
    // =========================================================================

    /// Mirror one allocation range.
    pub fn push_range(&mut self, begin: usize, end: usize) {
        self.rngs.push(RangeMark {
            begin,
            end,
            managed: false,
            scanned: false,
            retained: false,
            condemned: false,
        });
    }

    /// Record an owning slot pointing into range `range`.
    pub fn push_owning_record(
        &mut self,
        slot_addr: usize,
        head: OwningRef,
        range: u32,
        is_root: bool,
    ) {
        self.rngs[range as usize].managed = true;
        self.push_record(
            ScanRecord {
                slot_addr,
                range,
                owning: Some(head),
            },
            is_root,
        );
    }

    /// Record an observing slot pointing into range `range`.
    ///
    /// Observing records never touch the range's `managed` mark; an owning
    /// slot into the same range must keep it collectable-by-extraction.
    pub fn push_observing_record(&mut self, slot_addr: usize, range: u32, is_root: bool) {
        self.push_record(
            ScanRecord {
                slot_addr,
                range,
                owning: None,
            },
            is_root,
        );
    }

    fn push_record(&mut self, record: ScanRecord, is_root: bool) {
        let idx = self.info.len() as u32;
        self.info.push(record);
        if is_root {
            self.keep.push(idx);
        } else {
            self.scan.push(idx);
        }
    }

    /// Note the target range of a parked reference that will be released
    /// with this pass's batch.
    pub fn push_parked_target(&mut self, range: u32) {
        self.parked_targets.push(range);
    }

    // =========================================================================
    // Mark
    // =========================================================================

    /// Fold everything reachable from the roots into the keep-set.
    ///
    /// `keep` is treated as a growing work list. For each kept record whose
    /// target range has not been expanded yet, every still-unproven record
    /// whose storage lies inside that range (half-open) is moved to `keep`
    /// with a swap-and-pop; the order of `scan` is immaterial. The
    /// `scanned` mark prevents re-walking `scan` when several roots point
    /// into the same range. Terminates when the work index catches up with
    /// `keep`.
    pub fn mark(&mut self) {
        let mut i = 0;
        while i < self.keep.len() {
            let range = self.info[self.keep[i] as usize].range as usize;
            i += 1;

            if self.rngs[range].scanned {
                continue;
            }
            let begin = self.rngs[range].begin;
            let end = self.rngs[range].end;

            let mut j = 0;
            while j < self.scan.len() {
                let idx = self.scan[j];
                let addr = self.info[idx as usize].slot_addr;
                if addr >= begin && addr < end {
                    self.keep.push(idx);
                    self.scan.swap_remove(j);
                } else {
                    j += 1;
                }
            }

            self.rngs[range].scanned = true;
        }
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    /// Extract the strong references of every unreachable owning slot into
    /// `refs`, condemn the ranges those references (and the parked ones)
    /// target, and return the number of condemned ranges.
    ///
    /// A range is retained iff a *kept owning* slot targets it — that slot's
    /// reference survives the pass. A kept observing slot routes
    /// reachability into a range's interior but retains nothing, so a range
    /// can be `scanned` yet still condemned.
    ///
    /// # Safety
    ///
    /// Every owning head referenced from `scan` must still be live. This
    /// holds because unreachable slots live inside unreachable allocations,
    /// which nothing can destroy before the batch produced by this pass is
    /// dropped.
    pub unsafe fn sweep(&mut self, refs: &mut Vec<StrongRef>) -> usize {
        for &idx in &self.keep {
            let record = self.info[idx as usize];
            if record.owning.is_some() {
                self.rngs[record.range as usize].retained = true;
            }
        }

        for &idx in &self.scan {
            let record = self.info[idx as usize];
            if let Some(head) = record.owning {
                debug_assert!(self.rngs[record.range as usize].managed);
                if let Some(strong) = unsafe { (*head.0).take_strong() } {
                    refs.push(strong);
                }
                if !self.rngs[record.range as usize].retained {
                    self.rngs[record.range as usize].condemned = true;
                }
            }
        }

        for &range in &self.parked_targets {
            if !self.rngs[range as usize].retained {
                self.rngs[range as usize].condemned = true;
            }
        }

        self.rngs.iter().filter(|r| r.condemned).count()
    }

    /// Number of records produced by the current snapshot.
    #[cfg(test)]
    pub fn record_count(&self) -> usize {
        self.info.len()
    }

    #[cfg(test)]
    pub fn keep_len(&self) -> usize {
        self.keep.len()
    }

    #[cfg(test)]
    pub fn scan_len(&self) -> usize {
        self.scan.len()
    }
}
