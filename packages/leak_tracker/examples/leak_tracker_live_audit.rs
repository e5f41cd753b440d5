//! Mid-run audit: snapshot the live-allocation set without tearing
//! anything down.

use leak_tracker::{Allocator, live_allocations, tracked};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

fn main() {
    let held = tracked::alloc_array::<u64>(256);

    let live = live_allocations();
    println!("{} live allocations", live.len());

    // Only this file's allocations; the rest of the snapshot is library
    // traffic with UNKNOWN provenance.
    for record in live.records() {
        if record.site().file() == file!() {
            println!("still live: {record}");
        }
    }

    // SAFETY: allocated above, released exactly once.
    unsafe {
        tracked::free_array(held).expect("matching shape");
    }
}
