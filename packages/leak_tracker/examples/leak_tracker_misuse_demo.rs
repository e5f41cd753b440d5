//! Port of the classic new/delete misuse demo: wrong-shape releases warn
//! immediately on stderr, and anything never released prints as a `LEAK`
//! line when the session drops.

use std::collections::BTreeMap;

use leak_tracker::{Allocator, Session, tracked};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

fn main() {
    let session = Session::new();

    let wrong_release_scalar = tracked::alloc_scalar(1_i32);
    let wrong_release_array = tracked::alloc_array::<f64>(10);

    // Both of these warn: the shapes are swapped. The memory is still
    // freed, so neither shows up as a leak below.
    // SAFETY: allocated above; each pointer is released exactly once.
    unsafe {
        _ = tracked::free_array(wrong_release_scalar);
        _ = tracked::free_scalar(wrong_release_array);
    }

    let normal = tracked::alloc_array::<i32>(120);
    // SAFETY: allocated as an array on the line above, released once.
    unsafe {
        tracked::free_array(normal).expect("matching shape");
    }

    // Never released: each prints a LEAK line with its call site when the
    // session drops.
    let _scalar_leak = tracked::alloc_scalar(String::from("leaked"));
    let _array_leak = tracked::alloc_array::<f64>(100);

    // Library code allocates through the global-allocator hook; records
    // from this path carry UNKNOWN provenance.
    let mut map = BTreeMap::new();
    map.insert(0, 10);
    drop(map);

    drop(session);
}
