//! The allocation factory.
//!
//! `make_gc` is the only way to create a managed object. It places the
//! value in a reference-counted box, registers the value's byte interval
//! with the graph, enrolls the value's embedded slots at their final
//! storage addresses, and hands back a rooted owning pointer.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use crate::enroll::Enroll;
use crate::graph::graph;
use crate::ptr::GcRoot;
use crate::slot::{ErasedAllocation, StrongRef};

/// The managed allocation wrapping a user value.
///
/// Dropping the box — which happens when the last strong reference is
/// released, always from a garbage batch — first deregisters the range,
/// then drops the value; the value's embedded slots detach during that
/// drop, after their storage has already left the index.
pub(crate) struct GcBox<T: 'static> {
    value: ManuallyDrop<T>,
}

impl<T: 'static> GcBox<T> {
    fn new(value: T) -> Self {
        Self {
            value: ManuallyDrop::new(value),
        }
    }

    #[inline]
    fn value_ptr(&self) -> *const T {
        &*self.value
    }
}

impl<T: 'static> ErasedAllocation for GcBox<T> {}

impl<T: 'static> Drop for GcBox<T> {
    fn drop(&mut self) {
        graph().remove_range(self.value_ptr() as usize);
        // Safety: dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.value) }
    }
}

/// Allocate a managed object and return a rooted owning pointer to it.
///
/// The value is moved into its allocation first; only then is the
/// allocation's interval registered and the value enrolled, so every
/// embedded slot attaches at the address it will keep for the rest of the
/// object's life.
///
/// # Example
///
/// ```ignore
/// use tether_gc::{collect, make_gc, Enroll, Gc, Graph};
///
/// struct Node {
///     next: Gc<Node>,
/// }
///
/// unsafe impl Enroll for Node {
///     fn enroll(&self, graph: &Graph) {
///         self.next.enroll(graph);
///     }
/// }
///
/// let tail = make_gc(Node { next: Gc::null() });
/// let head = make_gc(Node { next: tail.share() });
/// drop(tail);
/// drop(head);
/// collect(); // both nodes come back in the batch
/// ```
pub fn make_gc<T: Enroll + 'static>(value: T) -> GcRoot<T> {
    let g = graph();

    let boxed = Arc::new(GcBox::new(value));
    let target = boxed.value_ptr();

    // Zero-sized values still get a distinct, non-empty interval.
    let size = std::mem::size_of::<T>().max(1);
    g.add_range(target as usize, size);
    boxed.value.enroll(g);

    let strong: StrongRef = boxed;
    GcRoot::adopt(strong, target)
}
