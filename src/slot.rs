//! Type-erased slot heads.
//!
//! Every owning or observing pointer, wherever it lives, embeds one of the
//! heads defined here. The head is the unit the graph registers: a fixed
//! layout the collector can read without knowing the pointee type. Owning
//! heads carry the strong reference that keeps an allocation alive;
//! observing heads carry only an address.
//!
//! # Safety
//!
//! The graph dereferences registered head pointers only inside the snapshot
//! critical section, while holding the registry lock. All head rewrites go
//! through [`crate::graph::Graph`] under that same lock, so a snapshot can
//! never observe a half-written head.

use std::cell::{Cell, UnsafeCell};
use std::ptr;
use std::sync::Arc;

/// Marker for type-erased managed allocations.
///
/// Implemented by every [`crate::alloc::GcBox`]; dropping the last
/// `Arc<dyn ErasedAllocation>` runs the concrete box's destructor, which
/// deregisters the allocation's range and detaches its embedded slots.
pub(crate) trait ErasedAllocation {}

/// A type-erased strong reference to a managed allocation.
pub(crate) type StrongRef = Arc<dyn ErasedAllocation>;

// =============================================================================
// Owning head
// =============================================================================

/// The graph-visible part of an owning pointer slot.
///
/// Holds the strong reference and a cached address of the referent value
/// inside its allocation. The target is null exactly when the strong
/// reference is absent.
pub(crate) struct OwningHead {
    /// Strong reference to the type-erased allocation.
    strong: UnsafeCell<Option<StrongRef>>,
    /// Cached address of the referent value. Null iff `strong` is `None`.
    target: Cell<*const ()>,
    /// Whether this head is currently registered with the graph.
    attached: Cell<bool>,
}

impl OwningHead {
    /// An empty, unregistered head.
    pub fn null() -> Self {
        Self {
            strong: UnsafeCell::new(None),
            target: Cell::new(ptr::null()),
            attached: Cell::new(false),
        }
    }

    /// A head holding `strong` and pointing at `target`.
    pub fn occupied(strong: StrongRef, target: *const ()) -> Self {
        debug_assert!(!target.is_null());
        Self {
            strong: UnsafeCell::new(Some(strong)),
            target: Cell::new(target),
            attached: Cell::new(false),
        }
    }

    /// Cached referent address.
    #[inline]
    pub fn target(&self) -> *const () {
        self.target.get()
    }

    /// Whether the head currently holds a strong reference.
    ///
    /// The target is the occupancy witness; it is null exactly when the
    /// strong reference is absent, and reading it does not touch the
    /// `UnsafeCell`.
    #[inline]
    pub fn is_occupied(&self) -> bool {
        !self.target.get().is_null()
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.set(attached);
    }

    /// Clone the held strong reference, if any.
    ///
    /// # Safety
    ///
    /// No concurrent rewrite of this head may be in progress. Callers are
    /// either on the mutator thread owning the slot, or inside the graph's
    /// registry critical section.
    pub unsafe fn clone_strong(&self) -> Option<StrongRef> {
        unsafe { (*self.strong.get()).clone() }
    }

    /// Move the strong reference out, leaving the head null.
    ///
    /// # Safety
    ///
    /// Same discipline as [`Self::clone_strong`].
    pub unsafe fn take_strong(&self) -> Option<StrongRef> {
        self.target.set(ptr::null());
        unsafe { (*self.strong.get()).take() }
    }

    /// Replace the head's contents, returning the previous strong reference
    /// and its target address.
    ///
    /// # Safety
    ///
    /// Same discipline as [`Self::clone_strong`].
    pub unsafe fn replace(
        &self,
        strong: Option<StrongRef>,
        target: *const (),
    ) -> (Option<StrongRef>, *const ()) {
        debug_assert_eq!(strong.is_none(), target.is_null());
        let old_target = self.target.replace(target);
        let old_strong = unsafe { ptr::replace(self.strong.get(), strong) };
        (old_strong, old_target)
    }
}

// =============================================================================
// Observing head
// =============================================================================

/// The graph-visible part of an observing pointer slot.
///
/// Carries only an address; never keeps anything alive.
pub(crate) struct ObservingHead {
    target: Cell<*const ()>,
    attached: Cell<bool>,
}

impl ObservingHead {
    pub fn null() -> Self {
        Self {
            target: Cell::new(ptr::null()),
            attached: Cell::new(false),
        }
    }

    pub fn pointing_at(target: *const ()) -> Self {
        Self {
            target: Cell::new(target),
            attached: Cell::new(false),
        }
    }

    #[inline]
    pub fn target(&self) -> *const () {
        self.target.get()
    }

    pub fn set_target(&self, target: *const ()) {
        self.target.set(target);
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.set(attached);
    }
}

// =============================================================================
// Send-safe head references
// =============================================================================

/// Registry entry for an owning head.
///
/// Safety: the pointer is dereferenced only between the head's attach and
/// detach, under the registry lock; the slot lifecycle contract guarantees
/// the storage stays valid for that window.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct OwningRef(pub *const OwningHead);

unsafe impl Send for OwningRef {}

impl OwningRef {
    #[inline]
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

/// Registry entry for an observing head. Same safety argument as
/// [`OwningRef`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct ObservingRef(pub *const ObservingHead);

unsafe impl Send for ObservingRef {}

impl ObservingRef {
    #[inline]
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

/// A strong reference parked for deferred release, with the address of its
/// referent so the sweep can attribute it to a range.
///
/// Safety: the reference is only cloned/dropped, never dereferenced through,
/// until the garbage batch releases it outside the graph locks.
pub(crate) struct Parked {
    pub strong: StrongRef,
    pub target: usize,
}

unsafe impl Send for Parked {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;
    impl ErasedAllocation for Dummy {}

    #[test]
    fn test_owning_head_lifecycle() {
        let value = 7u64;
        let strong: StrongRef = Arc::new(Dummy);
        let head = OwningHead::occupied(strong, &value as *const u64 as *const ());

        assert!(head.is_occupied());
        assert!(!head.is_attached());
        assert_eq!(head.target() as usize, &value as *const u64 as usize);

        let taken = unsafe { head.take_strong() };
        assert!(taken.is_some());
        assert!(!head.is_occupied());
        assert!(head.target().is_null());
    }

    #[test]
    fn test_owning_head_replace_returns_previous() {
        let a = 1u32;
        let b = 2u32;
        let head = OwningHead::occupied(Arc::new(Dummy), &a as *const u32 as *const ());

        let (old, old_target) = unsafe {
            head.replace(
                Some(Arc::new(Dummy)),
                &b as *const u32 as *const (),
            )
        };
        assert!(old.is_some());
        assert_eq!(old_target as usize, &a as *const u32 as usize);
        assert_eq!(head.target() as usize, &b as *const u32 as usize);
    }

    #[test]
    fn test_observing_head_retarget() {
        let x = 3u8;
        let head = ObservingHead::null();
        assert!(head.target().is_null());

        head.set_target(&x as *const u8 as *const ());
        assert_eq!(head.target() as usize, &x as *const u8 as usize);
    }
}
