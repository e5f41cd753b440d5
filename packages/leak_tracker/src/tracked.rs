//! Call-site-carrying allocation entry points.
//!
//! These are the audited program's own allocation forms. Each allocation
//! entry point is `#[track_caller]`, so the record carries the file and line
//! of the request — the role the host-language source rewrite (`__FILE__`/
//! `__LINE__` injection) plays in other renditions of this tool. The
//! deallocation entry points carry no provenance; that asymmetry is inherent
//! to the entry points being audited, and release diagnostics therefore
//! always point at the allocation site.
//!
//! Memory on this path comes from the raw platform primitive, not the Rust
//! global allocator: routing it through the global allocator would record
//! every request twice once [`crate::Allocator`] is installed.
//!
//! # Examples
//!
//! ```
//! use leak_tracker::tracked;
//!
//! let value = tracked::alloc_scalar(42_u64);
//! // SAFETY: allocated by `alloc_scalar` above, released exactly once.
//! unsafe {
//!     tracked::free_scalar(value).expect("released with the matching shape");
//! }
//! ```

use std::alloc::{Layout, handle_alloc_error};
use std::ptr::NonNull;

use crate::raw;
use crate::registry::{self, AllocationRecord, AllocationShape, CallSite, ReleaseError};

/// The single funnel every allocation entry point goes through: raw memory
/// first, then the registry record.
fn allocate(layout: Layout, shape: AllocationShape, site: CallSite) -> NonNull<u8> {
    let Some(ptr) = NonNull::new(raw::allocate(layout)) else {
        eprintln!("leak_tracker: failed to allocate {} bytes", layout.size());
        handle_alloc_error(layout);
    };

    registry::with_registry(|registry| {
        registry.record(AllocationRecord::new(
            ptr.addr().get(),
            layout.size(),
            shape,
            site,
        ));
    });
    ptr
}

/// Releases `address` with the requested shape, emitting any diagnostic as a
/// `WARN:` line on stderr.
fn release(address: usize, attempted: AllocationShape) -> Result<(), ReleaseError> {
    let result = registry::with_registry(|registry| registry.release(address, attempted));
    if let Err(error) = &result {
        eprintln!("WARN: {error}");
    }
    result
}

/// Allocates a single value, recording the allocation with the caller's
/// source location and scalar shape.
///
/// Release with [`free_scalar`]. Releasing with [`free_array`] is the shape
/// misuse this crate exists to flag: it warns, but still frees the memory.
///
/// Allocation failure is diagnosed on stderr and then escalated through
/// [`std::alloc::handle_alloc_error`].
///
/// # Examples
///
/// ```
/// use leak_tracker::tracked;
///
/// let counter = tracked::alloc_scalar(0_u32);
/// // SAFETY: `counter` points at the initialized value written above.
/// unsafe {
///     *counter.as_ptr() += 1;
/// }
/// // SAFETY: allocated by `alloc_scalar`, released exactly once.
/// unsafe {
///     tracked::free_scalar(counter).expect("released with the matching shape");
/// }
/// ```
#[must_use]
#[track_caller]
pub fn alloc_scalar<T>(value: T) -> NonNull<T> {
    let site = CallSite::caller();
    let ptr = allocate(Layout::new::<T>(), AllocationShape::Scalar, site).cast::<T>();
    // SAFETY: freshly allocated for `Layout::new::<T>()`, exclusive.
    unsafe { ptr.write(value) };
    ptr
}

/// Allocates storage for `len` values of `T`, recording the allocation with
/// the caller's source location and array shape.
///
/// The storage is zero-initialized bytes; the caller is responsible for
/// initializing elements before reading them as `T`. Release with
/// [`free_array`].
///
/// Allocation failure is diagnosed on stderr and then escalated through
/// [`std::alloc::handle_alloc_error`].
///
/// # Panics
///
/// Panics if the total size of the array overflows `usize`.
#[must_use]
#[track_caller]
pub fn alloc_array<T>(len: usize) -> NonNull<T> {
    let site = CallSite::caller();
    let layout = Layout::array::<T>(len).expect("array size overflows usize");
    let ptr = allocate(layout, AllocationShape::Array, site);
    // SAFETY: freshly allocated block of `layout.size()` writable bytes.
    unsafe { ptr.write_bytes(0, layout.size()) };
    ptr.cast::<T>()
}

/// Releases a scalar allocation made by [`alloc_scalar`].
///
/// The value is dropped in place and the raw memory is returned to the
/// platform allocator on every outcome. A validation failure — wrong shape
/// or unknown pointer — is emitted as a `WARN:` line on stderr and returned,
/// but is not fatal: the program continues and no leak is reported for the
/// address later.
///
/// # Safety
///
/// `ptr` must have been returned by [`alloc_scalar`] (or point at memory
/// from the raw platform allocator holding an initialized `T`) and must not
/// have been released before.
pub unsafe fn free_scalar<T>(ptr: NonNull<T>) -> Result<(), ReleaseError> {
    let result = release(ptr.addr().get(), AllocationShape::Scalar);
    // SAFETY: the caller guarantees an initialized `T`, not yet dropped.
    unsafe { ptr.drop_in_place() };
    // SAFETY: the caller guarantees platform-allocator provenance and single
    //         release.
    unsafe { raw::release(ptr.cast::<u8>().as_ptr()) };
    result
}

/// Releases an array allocation made by [`alloc_array`].
///
/// The raw memory is returned to the platform allocator on every outcome.
/// Element destructors are not run: deallocation requests carry no element
/// count. A validation failure is emitted as a `WARN:` line on stderr and
/// returned, but is not fatal.
///
/// # Safety
///
/// `ptr` must have been returned by [`alloc_array`] (or point at memory from
/// the raw platform allocator) and must not have been released before.
pub unsafe fn free_array<T>(ptr: NonNull<T>) -> Result<(), ReleaseError> {
    let result = release(ptr.addr().get(), AllocationShape::Array);
    // SAFETY: the caller guarantees platform-allocator provenance and single
    //         release.
    unsafe { raw::release(ptr.cast::<u8>().as_ptr()) };
    result
}
