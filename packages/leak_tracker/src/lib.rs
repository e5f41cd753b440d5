//! Runtime allocation auditing for tests and development.
//!
//! This package intercepts dynamic-memory allocation and deallocation,
//! records metadata about each live allocation, validates that every release
//! matches the shape the allocation was made with, and reports everything
//! never freed as a leak at teardown.
//!
//! Two interception surfaces feed one process-wide registry:
//!
//! - [`Allocator`] — a global-allocator wrapper installed with
//!   `#[global_allocator]`. It catches allocations made inside opaque
//!   library code (`Box`, `Vec`, `String`, ...); those records carry no
//!   call-site provenance.
//! - [`tracked`] — allocation entry points the audited program calls
//!   directly. They are `#[track_caller]`, so their records name the file
//!   and line of the request, and they distinguish scalar from array shape.
//!
//! Release misuse — wrong shape, or a pointer the auditor never saw — is
//! diagnosed immediately as a `WARN:` line on stderr; the memory is freed
//! regardless and the program continues. Dropping a [`Session`] prints a
//! `LEAK` line for every allocation still live.
//!
//! The registry's own bookkeeping is allocated with a raw platform
//! primitive (`libc`), outside the intercepted path, so the auditor never
//! re-enters the hooks it installs — not even when the registry grows.
//!
//! This package is not meant for use in production, serving only as a
//! development tool.
//!
//! # Simple usage
//!
//! ```
//! use leak_tracker::{Allocator, Session, tracked};
//!
//! #[global_allocator]
//! static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
//!
//! fn main() {
//!     let session = Session::new();
//!
//!     let value = tracked::alloc_scalar(42_u64);
//!     // SAFETY: allocated by `alloc_scalar` above, released exactly once.
//!     unsafe {
//!         tracked::free_scalar(value).expect("released with the matching shape");
//!     }
//!
//!     // Prints a LEAK line per remaining allocation, most recent first.
//!     drop(session);
//! }
//! ```
//!
//! # Observing without tearing down
//!
//! [`live_allocations`] snapshots the registry mid-run:
//!
//! ```
//! use leak_tracker::{live_allocations, tracked};
//!
//! let held = tracked::alloc_array::<u32>(16);
//! let address = held.addr().get();
//!
//! assert!(
//!     live_allocations()
//!         .records()
//!         .iter()
//!         .any(|record| record.address() == address)
//! );
//!
//! // SAFETY: allocated by `alloc_array` above, released exactly once.
//! unsafe {
//!     tracked::free_array(held).expect("released with the matching shape");
//! }
//! ```
//!
//! # Thread safety
//!
//! The reference design for this auditor is single-threaded, but a Rust
//! global allocator must be `Sync`, so the registry is serialized behind a
//! mutex. Records from all threads land in the same registry; `LEAK` output
//! order remains most-recent-first as observed by the registry.
//!
//! # Miri compatibility
//!
//! Miri replaces the global allocator and does not model the foreign
//! platform allocator, so code using this package cannot run under Miri.

mod allocator;
mod raw;
mod registry;
mod report;
mod session;
pub mod tracked;

pub use allocator::{Allocator, intercepted_allocation_count};
pub use registry::{AllocationRecord, AllocationShape, CallSite, ReleaseError};
pub use report::{LeakReport, live_allocations};
pub use session::Session;

// A poisoned registry lock means a panic mid-update; the records can no
// longer be trusted, so we do not limp on.
pub(crate) const ERR_POISONED_LOCK: &str =
    "encountered poisoned lock - the allocation registry may be inconsistent";
