//! Owning and observing smart pointers.
//!
//! Four types, two per kind:
//!
//! - [`GcRoot<T>`] / [`Gc<T>`] — owning slots. They hold a strong reference
//!   that keeps the referent alive outside tracing; an unreachable owning
//!   slot surrenders its reference to the garbage batch.
//! - [`GcRawRoot<T>`] / [`GcRaw<T>`] — observing slots. They hold only an
//!   address and never keep anything alive.
//!
//! The root variants pin their registered head in a `Box`, so their storage
//! address is stable and lies on the unmanaged heap — the trace always
//! classifies them as roots, wherever the handle value itself moves. The
//! plain variants are meant to be embedded by value in managed objects:
//! they start out detached and are attached once, at their final storage
//! address, when the containing allocation is enrolled.
//!
//! An attached slot's contents are only ever rewritten in place (`set`,
//! `clear`, `point_to`); its storage address never changes while attached.
//!
//! None of these types is `Send` or `Sync`: a managed object is mutated
//! only by the thread that can reach it, which is what makes lock-free slot
//! reads sound.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr;

use crate::enroll::Enroll;
use crate::graph::{graph, Graph};
use crate::slot::{ObservingHead, ObservingRef, OwningHead, OwningRef, StrongRef};

macro_rules! fmt_target {
    ($name:literal) => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.head.target().is_null() {
                write!(f, concat!($name, "(null)"))
            } else {
                write!(f, concat!($name, "({:p})"), self.head.target())
            }
        }
    };
}

// =============================================================================
// GcRoot
// =============================================================================

/// A rooted owning pointer to a managed object.
///
/// Always occupied; produced by [`crate::make_gc`] and [`Gc::to_root`]. As
/// long as a `GcRoot` exists, its referent and everything reachable from it
/// survive every collection. Dropping it parks the strong reference for
/// release by the next collection.
pub struct GcRoot<T> {
    head: Box<OwningHead>,
    _marker: PhantomData<*const T>,
}

impl<T> GcRoot<T> {
    /// Build a root over an already-registered allocation.
    pub(crate) fn adopt(strong: StrongRef, target: *const T) -> Self {
        let head = Box::new(OwningHead::occupied(strong, target as *const ()));
        head.set_attached(true);
        graph().attach_owning(OwningRef(&*head));
        Self {
            head,
            _marker: PhantomData,
        }
    }

    /// Address of the referent value.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.head.target() as *const T
    }

    /// Create a detached interior slot holding the same referent.
    pub fn share(&self) -> Gc<T> {
        Gc::from_root(self)
    }
}

impl<T> Deref for GcRoot<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // A root is occupied by construction until dropped.
        unsafe { &*self.as_ptr() }
    }
}

impl<T> Clone for GcRoot<T> {
    fn clone(&self) -> Self {
        // Safety: this thread owns the handle; rewrites of this head can
        // only originate here.
        let strong = unsafe { self.head.clone_strong() };
        let strong = strong.expect("root slot must hold a reference");
        Self::adopt(strong, self.as_ptr())
    }
}

impl<T> Drop for GcRoot<T> {
    fn drop(&mut self) {
        graph().release_owning(&self.head);
    }
}

impl<T> PartialEq for GcRoot<T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.as_ptr(), other.as_ptr())
    }
}

impl<T> Eq for GcRoot<T> {}

impl<T> fmt::Debug for GcRoot<T> {
    fmt_target!("GcRoot");
}

// =============================================================================
// Gc
// =============================================================================

/// An interior owning pointer slot, embedded by value in managed objects.
///
/// Constructed detached; attached at its final storage address when the
/// containing allocation is enrolled. A detached occupied slot still keeps
/// its referent alive (the strong reference does that, not the registry),
/// but is invisible to the trace — long-lived occupied slots belong inside
/// managed allocations or behind a [`GcRoot`].
pub struct Gc<T> {
    head: OwningHead,
    _marker: PhantomData<*const T>,
}

impl<T> Gc<T> {
    /// An empty slot.
    pub fn null() -> Self {
        Self {
            head: OwningHead::null(),
            _marker: PhantomData,
        }
    }

    /// A detached slot holding the same referent as `root`.
    pub fn from_root(root: &GcRoot<T>) -> Self {
        // Safety: `root`'s head is only rewritten by its owning thread.
        let strong = unsafe { root.head.clone_strong() };
        let strong = strong.expect("root slot must hold a reference");
        Self {
            head: OwningHead::occupied(strong, root.as_ptr() as *const ()),
            _marker: PhantomData,
        }
    }

    /// A detached slot holding the same referent as `other`.
    pub fn from_gc(other: &Gc<T>) -> Self {
        let strong = unsafe { other.head.clone_strong() };
        match strong {
            Some(strong) => Self {
                head: OwningHead::occupied(strong, other.head.target()),
                _marker: PhantomData,
            },
            None => Self::null(),
        }
    }

    /// Whether the slot is empty.
    #[inline]
    pub fn is_null(&self) -> bool {
        !self.head.is_occupied()
    }

    /// Address of the referent value, or null.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.head.target() as *const T
    }

    /// The referent, if the slot is occupied.
    ///
    /// The borrow does not pin the referent: overwriting the slot and then
    /// collecting can free it while the reference is still held. Keeping a
    /// referent alive across collection points is what [`Gc::to_root`] is
    /// for.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.is_null() {
            None
        } else {
            Some(unsafe { &*self.as_ptr() })
        }
    }

    /// Point this slot at `root`'s referent, releasing the previous one.
    ///
    /// The rewrite happens in place, under the registry lock; the slot's
    /// registration is untouched.
    pub fn set_root(&self, root: &GcRoot<T>) {
        let strong = unsafe { root.head.clone_strong() };
        let strong = strong.expect("root slot must hold a reference");
        graph().rewrite_owning(&self.head, Some(strong), root.as_ptr() as *const ());
    }

    /// Point this slot at the same referent as `other`.
    pub fn set(&self, other: &Gc<T>) {
        let strong = unsafe { other.head.clone_strong() };
        let target = other.head.target();
        graph().rewrite_owning(&self.head, strong, target);
    }

    /// Empty the slot, releasing the previous referent if any.
    pub fn clear(&self) {
        graph().rewrite_owning(&self.head, None, ptr::null());
    }

    /// Promote to a rooted handle keeping the referent alive.
    pub fn to_root(&self) -> Option<GcRoot<T>> {
        let strong = unsafe { self.head.clone_strong() }?;
        Some(GcRoot::adopt(strong, self.as_ptr()))
    }
}

impl<T> Default for Gc<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Deref for Gc<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.get().expect("dereferenced a null Gc")
    }
}

/// Safety: attaches exactly this slot, at its own storage address.
unsafe impl<T> Enroll for Gc<T> {
    fn enroll(&self, graph: &Graph) {
        assert!(!self.head.is_attached(), "owning slot enrolled twice");
        self.head.set_attached(true);
        graph.attach_owning(OwningRef(&self.head));
    }
}

impl<T> Drop for Gc<T> {
    fn drop(&mut self) {
        if self.head.is_attached() || self.head.is_occupied() {
            graph().release_owning(&self.head);
        }
    }
}

impl<T> fmt::Debug for Gc<T> {
    fmt_target!("Gc");
}

// =============================================================================
// GcRawRoot
// =============================================================================

/// A rooted observing pointer: an address on a stable, unmanaged storage
/// location. Participates in tracing as a root but keeps nothing alive.
pub struct GcRawRoot<T> {
    head: Box<ObservingHead>,
    _marker: PhantomData<*const T>,
}

impl<T> GcRawRoot<T> {
    /// Observe `target`.
    pub fn new(target: &T) -> Self {
        let head = Box::new(ObservingHead::pointing_at(target as *const T as *const ()));
        head.set_attached(true);
        graph().attach_observing(ObservingRef(&*head));
        Self {
            head,
            _marker: PhantomData,
        }
    }

    /// The observed address.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.head.target() as *const T
    }

    /// Re-aim at a different target.
    pub fn point_to(&self, target: &T) {
        graph().retarget_observing(&self.head, target as *const T as *const ());
    }

    /// The observed value.
    ///
    /// # Safety
    ///
    /// The referent must still be alive; observing slots do not keep it so.
    pub unsafe fn get(&self) -> &T {
        unsafe { &*self.as_ptr() }
    }
}

impl<T> Clone for GcRawRoot<T> {
    fn clone(&self) -> Self {
        let head = Box::new(ObservingHead::pointing_at(self.head.target()));
        head.set_attached(true);
        graph().attach_observing(ObservingRef(&*head));
        Self {
            head,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for GcRawRoot<T> {
    fn drop(&mut self) {
        graph().detach_observing(ObservingRef(&*self.head));
    }
}

// =============================================================================
// GcRaw
// =============================================================================

/// An interior observing pointer slot, embedded by value in managed
/// objects. May target any address, including the middle of another
/// allocation; containment decides which allocation it attributes to.
pub struct GcRaw<T> {
    head: ObservingHead,
    _marker: PhantomData<*const T>,
}

impl<T> GcRaw<T> {
    /// An empty slot.
    pub fn null() -> Self {
        Self {
            head: ObservingHead::null(),
            _marker: PhantomData,
        }
    }

    /// A detached slot observing `target`.
    pub fn pointing_at(target: &T) -> Self {
        Self {
            head: ObservingHead::pointing_at(target as *const T as *const ()),
            _marker: PhantomData,
        }
    }

    /// Whether the slot holds no address.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.head.target().is_null()
    }

    /// The observed address, or null.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.head.target() as *const T
    }

    /// Re-aim at a different target.
    pub fn point_to(&self, target: &T) {
        graph().retarget_observing(&self.head, target as *const T as *const ());
    }

    /// Forget the observed address.
    pub fn clear(&self) {
        graph().retarget_observing(&self.head, ptr::null());
    }

    /// The observed value.
    ///
    /// # Safety
    ///
    /// The slot must be non-null and the referent still alive; observing
    /// slots do not keep it so.
    pub unsafe fn get(&self) -> &T {
        unsafe { &*self.as_ptr() }
    }
}

impl<T> Default for GcRaw<T> {
    fn default() -> Self {
        Self::null()
    }
}

/// Safety: attaches exactly this slot, at its own storage address.
unsafe impl<T> Enroll for GcRaw<T> {
    fn enroll(&self, graph: &Graph) {
        assert!(!self.head.is_attached(), "observing slot enrolled twice");
        self.head.set_attached(true);
        graph.attach_observing(ObservingRef(&self.head));
    }
}

impl<T> Drop for GcRaw<T> {
    fn drop(&mut self) {
        if self.head.is_attached() {
            graph().detach_observing(ObservingRef(&self.head));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_slot_is_inert() {
        let slot: Gc<u64> = Gc::null();
        assert!(slot.is_null());
        assert!(slot.get().is_none());
        assert!(slot.as_ptr().is_null());
        // Dropping a detached null slot must not touch the graph.
    }

    #[test]
    fn test_default_is_null() {
        let slot: Gc<String> = Gc::default();
        assert!(slot.is_null());
        let raw: GcRaw<String> = GcRaw::default();
        assert!(raw.is_null());
    }

    #[test]
    fn test_detached_observer_targets() {
        let value = 99u32;
        let raw = GcRaw::pointing_at(&value);
        assert_eq!(raw.as_ptr(), &value as *const u32);
        assert_eq!(unsafe { *raw.get() }, 99);

        let other = 7u32;
        // A detached slot can be re-aimed; the rewrite goes through the
        // graph lock either way.
        raw.point_to(&other);
        assert_eq!(raw.as_ptr(), &other as *const u32);
    }

    #[test]
    #[should_panic(expected = "dereferenced a null Gc")]
    fn test_null_deref_panics() {
        let slot: Gc<u64> = Gc::null();
        let _ = *slot;
    }
}
