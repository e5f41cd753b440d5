//! The raw platform allocation primitive.
//!
//! Everything the auditor allocates for itself comes from here, never from
//! the Rust global allocator. Once [`crate::Allocator`] is installed as the
//! global allocator, any bookkeeping routed through `std::alloc` would
//! re-enter the very hook it is bookkeeping for, recursing the first time
//! the registry needs to grow.

use std::alloc::Layout;
use std::ffi::c_void;

/// Alignment that `libc::malloc` already guarantees.
const MALLOC_ALIGN: usize = align_of::<libc::max_align_t>();

/// Requests memory for `layout` from the platform allocator.
///
/// Returns null on exhaustion. The caller decides whether that is fatal.
pub(crate) fn allocate(layout: Layout) -> *mut u8 {
    if layout.align() <= MALLOC_ALIGN {
        // SAFETY: `malloc` has no preconditions.
        unsafe { libc::malloc(layout.size()) }.cast::<u8>()
    } else {
        // `aligned_alloc` requires the size to be a multiple of the
        // alignment. On overflow the oversized request simply fails and the
        // null pointer takes the exhaustion path.
        let size = layout
            .size()
            .checked_next_multiple_of(layout.align())
            .unwrap_or(usize::MAX);
        // SAFETY: `layout.align()` is a power of two per `Layout`'s contract.
        unsafe { libc::aligned_alloc(layout.align(), size) }.cast::<u8>()
    }
}

/// Returns memory obtained from [`allocate`] to the platform allocator.
///
/// # Safety
///
/// `ptr` must have been returned by [`allocate`] and not released before.
pub(crate) unsafe fn release(ptr: *mut u8) {
    // SAFETY: `free` accepts any pointer previously returned by `malloc` or
    //         `aligned_alloc`; the caller guarantees single release.
    unsafe { libc::free(ptr.cast::<c_void>()) }
}
