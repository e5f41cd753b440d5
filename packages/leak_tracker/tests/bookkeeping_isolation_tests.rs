//! Regression coverage for the auditor's core invariant: registry
//! bookkeeping must never flow through the intercepted allocation entry
//! points. If it did, the first registry growth after installing the hook
//! would recurse back into it.
//!
//! This binary holds a single test so no concurrent test traffic can touch
//! the intercepted-call counter during the measured window.

#![cfg(not(miri))] // Miri replaces the global allocator, so cannot be used here.

use leak_tracker::{Allocator, intercepted_allocation_count, tracked};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

#[test]
fn registry_bookkeeping_is_not_intercepted() {
    const ALLOCATIONS: usize = 100;

    // Reserve ahead of the measured window; pushes below stay within
    // capacity and cannot allocate.
    let mut pointers = Vec::with_capacity(ALLOCATIONS);

    let before = intercepted_allocation_count();
    for _ in 0..ALLOCATIONS {
        pointers.push(tracked::alloc_scalar(0_u64));
    }
    let after = intercepted_allocation_count();

    assert_eq!(
        after - before,
        0,
        "tracked allocations and their registry records must bypass the hook"
    );

    for ptr in pointers {
        // SAFETY: allocated in the loop above, each released exactly once.
        unsafe { tracked::free_scalar(ptr) }.expect("matching shape");
    }
}
