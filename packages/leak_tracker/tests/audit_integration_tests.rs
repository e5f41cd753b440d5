//! End-to-end audit tests with the interception hook installed.
//!
//! The registry in this binary is shared by every test and by the test
//! harness itself, so assertions are membership-based: they look for (or
//! rule out) specific addresses rather than expecting the registry to be
//! empty.

#![cfg(not(miri))] // Miri replaces the global allocator, so cannot be used here.

use std::ptr::NonNull;

use leak_tracker::{
    Allocator, AllocationShape, LeakReport, ReleaseError, intercepted_allocation_count,
    live_allocations, tracked,
};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

fn contains_address(report: &LeakReport, address: usize) -> bool {
    report
        .records()
        .iter()
        .any(|record| record.address() == address)
}

#[test]
fn library_allocations_are_tracked_without_provenance() {
    // A distinctive size so a coincidental later allocation at the same
    // address will not masquerade as this record.
    const SIZE: usize = 4099;

    let data = vec![1_u8; SIZE];
    let address = data.as_ptr().addr();

    let live = live_allocations();
    let record = live
        .records()
        .iter()
        .find(|record| record.address() == address)
        .expect("library allocation was recorded");
    assert_eq!(record.size(), SIZE);
    assert!(!record.site().is_known());

    drop(data);

    assert!(
        !live_allocations()
            .records()
            .iter()
            .any(|record| record.address() == address && record.size() == SIZE),
        "released library allocation must leave the registry"
    );
}

#[test]
fn growing_library_allocations_keep_a_single_current_record() {
    let mut data = Vec::with_capacity(16);
    data.extend(std::iter::repeat_n(7_u8, 16));
    // Force reallocation to a larger block.
    data.extend(std::iter::repeat_n(7_u8, 9000));

    let address = data.as_ptr().addr();
    let live = live_allocations();
    let record = live
        .records()
        .iter()
        .find(|record| record.address() == address)
        .expect("grown allocation was recorded");
    assert!(record.size() >= data.capacity());

    drop(data);
}

#[test]
fn tracked_roundtrip_is_clean_and_carries_the_call_site() {
    let (ptr, line) = (tracked::alloc_scalar(7_u32), i64::from(line!()));
    let address = ptr.addr().get();

    let live = live_allocations();
    let record = live
        .records()
        .iter()
        .find(|record| record.address() == address)
        .expect("tracked allocation was recorded");
    assert_eq!(record.size(), size_of::<u32>());
    assert_eq!(record.shape(), AllocationShape::Scalar);
    assert_eq!(record.site().file(), file!());
    assert_eq!(record.site().line(), line);

    // SAFETY: allocated above, released exactly once.
    let released = unsafe { tracked::free_scalar(ptr) };
    assert_eq!(released, Ok(()));
    assert!(!contains_address(&live_allocations(), address));
}

#[test]
fn reference_misuse_scenario_end_to_end() {
    // Scalar A and array B, mirroring the classic demo program.
    let (a, a_line) = (tracked::alloc_scalar(0_i32), i64::from(line!()));
    let b = tracked::alloc_array::<f64>(10);
    let a_address = a.addr().get();
    let b_address = b.addr().get();

    // Releasing A as an array warns, naming A, its site and both shapes.
    // SAFETY: allocated above; `free_array` frees the memory even on a
    //         mismatch, so this is A's one and only release.
    let error = unsafe { tracked::free_array(a) }.expect_err("scalar released as array");
    match &error {
        ReleaseError::ShapeMismatch {
            address,
            site,
            allocated,
            attempted,
        } => {
            assert_eq!(*address, a_address);
            assert_eq!(site.file(), file!());
            assert_eq!(site.line(), a_line);
            assert_eq!(*allocated, AllocationShape::Scalar);
            assert_eq!(*attempted, AllocationShape::Array);
        }
        other => panic!("expected a shape mismatch, got {other:?}"),
    }
    let message = error.to_string();
    assert!(message.contains("use scalar free instead of array free"));

    // The mismatched release still removed the record.
    assert!(!contains_address(&live_allocations(), a_address));

    // Releasing B with the matching shape succeeds silently.
    // SAFETY: allocated as an array above, released exactly once.
    let released = unsafe { tracked::free_array(b) };
    assert_eq!(released, Ok(()));
    assert!(!contains_address(&live_allocations(), b_address));
}

#[test]
fn untracked_foreign_pointer_release_is_diagnosed_not_fatal() {
    // Allocated directly against the platform allocator: this bypasses the
    // interception surface entirely, like memory handed over by foreign
    // code.
    // SAFETY: plain malloc of a u64-sized block.
    let ptr = unsafe { libc::malloc(size_of::<u64>()) };
    let ptr = NonNull::new(ptr.cast::<u64>()).expect("malloc succeeded");

    // SAFETY: platform-allocator provenance, released exactly once; `u64`
    //         has no drop glue.
    let result = unsafe { tracked::free_scalar(ptr) };

    assert_eq!(
        result,
        Err(ReleaseError::UnknownPointer {
            address: ptr.addr().get(),
            attempted: AllocationShape::Scalar,
        })
    );
    assert_eq!(
        result.expect_err("unknown pointer").to_string(),
        format!("scalar free of unknown pointer {:#x}", ptr.addr().get())
    );
}

#[test]
fn program_allocations_are_intercepted() {
    let before = intercepted_allocation_count();
    let data = vec![0_u8; 512];
    assert!(
        intercepted_allocation_count() > before,
        "library allocations must flow through the hook"
    );
    drop(data);
}

#[test]
fn never_released_allocation_stays_live_with_its_record() {
    let (leak, line) = (tracked::alloc_array::<u8>(800), i64::from(line!()));
    let address = leak.addr().get();

    let live = live_allocations();
    let record = live
        .records()
        .iter()
        .find(|record| record.address() == address)
        .expect("leaked allocation is still recorded");
    assert_eq!(record.size(), 800);
    assert_eq!(record.shape(), AllocationShape::Array);
    assert_eq!(record.site().line(), line);
    assert_eq!(
        record.to_string(),
        format!("LEAK 800 bytes at {address:#x} (allocated at {}:{line})", file!())
    );

    // Deliberately never released: teardown reporting for it is covered by
    // the session integration binary.
}
