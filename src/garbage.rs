//! The destruction batch handed back by a collection pass.

use crate::slot::StrongRef;

/// An opaque, move-only batch of strong references extracted from
/// unreachable owning slots (plus references parked for deferred release).
///
/// Dropping the batch releases the references in their recorded order,
/// outside any graph lock. Destructors of freed objects re-enter
/// `remove_range` and `detach`, which is safe because the collection that
/// produced the batch has already released its locks and cleared its
/// in-progress flag. The caller may drop the batch immediately or defer it
/// off the mutator's critical path.
///
/// The batch must not be destroyed while another thread is still mutating
/// the subgraph it condemns; a well-behaved caller never has such a thread,
/// since condemned objects are unreachable.
#[must_use = "dropping the batch is what actually frees the collected objects"]
pub struct Garbage {
    refs: Vec<StrongRef>,
    objects: usize,
}

// Safety: the batch owns its references exclusively and only drops them;
// referents of a condemned subgraph are unreachable from any mutator.
unsafe impl Send for Garbage {}

impl Garbage {
    pub(crate) fn new(refs: Vec<StrongRef>, objects: usize) -> Self {
        Self { refs, objects }
    }

    /// An empty batch, as returned by a re-entered or no-op collection.
    pub(crate) fn empty() -> Self {
        Self {
            refs: Vec::new(),
            objects: 0,
        }
    }

    /// Number of allocations this batch will free when dropped.
    ///
    /// This counts objects, not references; a single object can be held by
    /// several extracted references.
    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects
    }

    /// Number of strong references held by the batch.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    /// Whether the batch holds nothing at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl std::fmt::Debug for Garbage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Garbage")
            .field("objects", &self.objects)
            .field("refs", &self.refs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch() {
        let garbage = Garbage::empty();
        assert!(garbage.is_empty());
        assert_eq!(garbage.object_count(), 0);
        assert_eq!(garbage.ref_count(), 0);
    }
}
