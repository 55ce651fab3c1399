//! End-to-end collection scenarios.
//!
//! These tests exercise the full pipeline — allocation, slot registration,
//! trace, batch destruction — against the process-wide graph. Because the
//! graph is shared, every test serializes on one lock and drains leftover
//! garbage before making absolute assertions.
//!
//! Coverage:
//! - Acyclic and cyclic unreachable subgraphs, rooted survivors
//! - Observing slots: non-owning, interior attribution, dangling targets
//! - Deferred release: batches free objects, nothing frees without one
//! - Re-entrancy of `collect` across threads

use parking_lot::{Mutex, MutexGuard};

use tether_gc::{
    allocated_bytes, allocated_objects, collect, graph, make_gc, Enroll, Gc, GcRaw, GcRawRoot,
    GcRoot, Graph,
};

// =============================================================================
// Harness
// =============================================================================

static GRAPH_LOCK: Mutex<()> = Mutex::new(());

/// Take the shared-graph lock and drain anything a previous test parked.
fn exclusive() -> MutexGuard<'static, ()> {
    let guard = GRAPH_LOCK.lock();
    loop {
        let garbage = collect();
        let done = garbage.is_empty();
        drop(garbage);
        if done {
            break;
        }
    }
    assert_eq!(allocated_objects(), 0, "test started with leftover objects");
    guard
}

struct Node {
    next: Gc<Node>,
    weight: u64,
}

unsafe impl Enroll for Node {
    fn enroll(&self, graph: &Graph) {
        self.next.enroll(graph);
    }
}

fn leaf(weight: u64) -> GcRoot<Node> {
    make_gc(Node {
        next: Gc::null(),
        weight,
    })
}

fn pointing(to: &GcRoot<Node>, weight: u64) -> GcRoot<Node> {
    make_gc(Node {
        next: Gc::from_root(to),
        weight,
    })
}

// =============================================================================
// Boundary behaviors
// =============================================================================

#[test]
fn test_empty_graph_collects_nothing() {
    let _g = exclusive();

    let garbage = collect();
    assert!(garbage.is_empty());
    assert_eq!(garbage.object_count(), 0);
}

#[test]
fn test_allocation_statistics() {
    let _g = exclusive();

    let a = leaf(1);
    let b = leaf(2);
    assert_eq!(allocated_objects(), 2);
    assert_eq!(allocated_bytes(), 2 * std::mem::size_of::<Node>());

    drop(a);
    drop(b);
    drop(collect());
    assert_eq!(allocated_objects(), 0);
    assert_eq!(allocated_bytes(), 0);
}

#[test]
fn test_one_past_the_end_attributes_to_range() {
    let _g = exclusive();

    let a = leaf(0);
    let begin = a.as_ptr() as usize;
    let end = begin + std::mem::size_of::<Node>();

    let range = graph().find_range(end).expect("inclusive upper bound");
    assert_eq!(range.begin, begin);
    assert_eq!(graph().find_range(end + 1), None);
}

// =============================================================================
// Reachability scenarios
// =============================================================================

#[test]
fn test_linear_chain_collected() {
    let _g = exclusive();

    // A owns B owns C; then every root goes away.
    let c = leaf(2);
    let b = pointing(&c, 1);
    let a = pointing(&b, 0);
    assert_eq!(allocated_objects(), 3);

    drop(a);
    drop(b);
    drop(c);

    // Nothing is freed by dropping roots; the trace finds all three.
    assert_eq!(allocated_objects(), 3);
    let garbage = collect();
    assert_eq!(garbage.object_count(), 3);

    // Memory is released by the batch, not the pass.
    assert_eq!(allocated_objects(), 3);
    drop(garbage);
    assert_eq!(allocated_objects(), 0);
}

#[test]
fn test_rooted_chain_survives() {
    let _g = exclusive();

    let c = leaf(2);
    let b = pointing(&c, 1);
    let a = pointing(&b, 0);
    drop(b);
    drop(c);

    // Everything is reachable from the remaining root.
    let garbage = collect();
    assert_eq!(garbage.object_count(), 0);
    drop(garbage);
    assert_eq!(allocated_objects(), 3);
    assert_eq!(a.next.get().unwrap().next.get().unwrap().weight, 2);
}

#[test]
fn test_cycle_of_two_collected() {
    let _g = exclusive();

    let a = leaf(0);
    let b = pointing(&a, 1);
    a.next.set_root(&b);
    drop(a);
    drop(b);

    let garbage = collect();
    assert_eq!(garbage.object_count(), 2);
    drop(garbage);
    assert_eq!(allocated_objects(), 0);
}

#[test]
fn test_rooted_cycle_survives() {
    let _g = exclusive();

    // Stack-held root owns A; A and B own each other.
    let a = leaf(0);
    let b = pointing(&a, 1);
    a.next.set_root(&b);
    drop(b);

    let garbage = collect();
    assert_eq!(garbage.object_count(), 0);
    drop(garbage);
    assert_eq!(allocated_objects(), 2);

    // Release the root; the cycle has no external owner left.
    drop(a);
    let garbage = collect();
    assert_eq!(garbage.object_count(), 2);
    drop(garbage);
    assert_eq!(allocated_objects(), 0);
}

#[test]
fn test_unrooted_holder_subgraph_collected() {
    let _g = exclusive();

    // The only owning slot referring to X lives inside H.
    let x = leaf(7);
    let h = pointing(&x, 0);
    drop(x);

    // H is rooted, so X is retained through it.
    let garbage = collect();
    assert_eq!(garbage.object_count(), 0);
    drop(garbage);
    assert_eq!(allocated_objects(), 2);

    // Unroot H: the whole subgraph goes.
    drop(h);
    let garbage = collect();
    assert_eq!(garbage.object_count(), 2);
    drop(garbage);
    assert_eq!(allocated_objects(), 0);
}

#[test]
fn test_slot_overwrite_releases_previous_referent() {
    let _g = exclusive();

    let a = leaf(0);
    let b = leaf(1);
    let c = leaf(2);
    a.next.set_root(&b);
    drop(b);
    a.next.set_root(&c); // B's last reference is parked here
    drop(c);

    let garbage = collect();
    assert_eq!(garbage.object_count(), 1);
    drop(garbage);
    assert_eq!(allocated_objects(), 2);
    assert_eq!(a.next.get().unwrap().weight, 2);
}

#[test]
fn test_to_root_promotion_keeps_referent_alive() {
    let _g = exclusive();

    let b = leaf(2);
    let a = pointing(&b, 1);
    drop(b);

    let b_again = a.next.to_root().expect("slot is occupied");
    drop(a);

    let garbage = collect();
    assert_eq!(garbage.object_count(), 1);
    drop(garbage);
    assert_eq!(allocated_objects(), 1);
    assert_eq!(b_again.weight, 2);
}

#[test]
fn test_moved_root_handle_stays_rooted() {
    let _g = exclusive();

    let a = leaf(3);
    // Moving the handle does not move its registered head.
    let boxed = Box::new(a);
    let stashed = vec![*boxed];

    let garbage = collect();
    assert_eq!(garbage.object_count(), 0);
    drop(garbage);
    assert_eq!(allocated_objects(), 1);
    assert_eq!(stashed[0].weight, 3);
}

// =============================================================================
// Observing slots
// =============================================================================

struct Buffer {
    data: [u8; 64],
}

unsafe impl Enroll for Buffer {
    fn enroll(&self, _graph: &Graph) {}
}

struct Viewer {
    buffer: Gc<Buffer>,
    cursor: GcRaw<u8>,
}

unsafe impl Enroll for Viewer {
    fn enroll(&self, graph: &Graph) {
        self.buffer.enroll(graph);
        self.cursor.enroll(graph);
    }
}

#[test]
fn test_observer_only_object_collected() {
    let _g = exclusive();

    let x = leaf(9);
    let observer = GcRawRoot::new(&*x);
    drop(x);

    // The observer contributes nothing to liveness.
    let garbage = collect();
    assert_eq!(garbage.object_count(), 1);
    drop(garbage);
    assert_eq!(allocated_objects(), 0);

    // The observer now dangles; the next pass must ignore it cleanly.
    let garbage = collect();
    assert!(garbage.is_empty());
    drop(observer);
}

#[test]
fn test_interior_pointer_attribution() {
    let _g = exclusive();

    let b = make_gc(Buffer { data: [7; 64] });
    let mid = &b.data[32] as *const u8 as usize;
    let a = make_gc(Viewer {
        buffer: Gc::from_root(&b),
        cursor: GcRaw::pointing_at(&b.data[32]),
    });
    drop(b);

    // The mid-buffer address attributes to the buffer's range.
    let range = graph().find_range(mid).expect("interior address is contained");
    assert_eq!(range.begin, a.buffer.as_ptr() as usize);
    assert_eq!(range.size(), std::mem::size_of::<Buffer>());

    // Rooted through `a`; nothing dies.
    let garbage = collect();
    assert_eq!(garbage.object_count(), 0);
    drop(garbage);
    assert_eq!(allocated_objects(), 2);
    assert_eq!(unsafe { *a.cursor.get() }, 7);
}

#[test]
fn test_observer_into_unmanaged_memory_is_ignored() {
    let _g = exclusive();

    let local = 5u32;
    let _observer = GcRawRoot::new(&local);
    let a = leaf(0);

    let garbage = collect();
    assert_eq!(garbage.object_count(), 0);
    drop(garbage);
    assert_eq!(allocated_objects(), 1);
    drop(a);
}

// =============================================================================
// Idempotence and re-entrancy
// =============================================================================

#[test]
fn test_collect_is_idempotent() {
    let _g = exclusive();

    let a = leaf(0);
    let b = pointing(&a, 1);
    a.next.set_root(&b);
    drop(a);
    drop(b);

    let first = collect();
    assert_eq!(first.object_count(), 2);

    // No mutator activity since: the second pass finds nothing, even
    // before the first batch has been destroyed.
    let second = collect();
    assert!(second.is_empty());

    drop(first);
    drop(second);
    assert_eq!(allocated_objects(), 0);

    let third = collect();
    assert!(third.is_empty());
}

#[test]
fn test_reentrant_collection_from_two_threads() {
    let _g = exclusive();

    const OBJECTS: usize = 100_000;
    {
        let mut roots = Vec::with_capacity(OBJECTS);
        for i in 0..OBJECTS {
            roots.push(leaf(i as u64));
        }
        assert_eq!(allocated_objects(), OBJECTS);
    } // all roots parked

    let barrier = std::sync::Barrier::new(2);
    let counts: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    let garbage = collect();
                    let objects = garbage.object_count();
                    drop(garbage);
                    objects
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Exactly one batch did the work; a pass that lost the guard (or ran
    // after the sweep) came back empty without blocking.
    assert_eq!(counts.iter().sum::<usize>(), OBJECTS);
    assert_eq!(counts.iter().filter(|&&n| n > 0).count(), 1);
    assert_eq!(allocated_objects(), 0);
    assert!(graph().stats().collections.load(std::sync::atomic::Ordering::Relaxed) >= 1);
}
