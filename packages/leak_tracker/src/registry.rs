//! The live-allocation registry.
//!
//! One record per currently-live allocation, keyed by address. Storage is an
//! intrusive singly-linked list whose nodes come from [`raw`] — the registry
//! must never allocate through the Rust global allocator, because the
//! interception hook *is* the global allocator once installed. New records
//! go at the head, so draining reports the most recently recorded
//! allocation first.

use std::alloc::{Layout, handle_alloc_error};
use std::fmt;
use std::mem;
use std::panic::Location;
use std::ptr::{self, NonNull};
use std::sync::Mutex;

use crate::ERR_POISONED_LOCK;
use crate::raw;

/// Whether a memory request was made as a single object or as a contiguous
/// sequence of elements.
///
/// Releasing with the opposite shape is the usage error this crate flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllocationShape {
    /// A single-object request.
    Scalar,
    /// A contiguous-sequence request.
    Array,
}

impl fmt::Display for AllocationShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => f.write_str("scalar"),
            Self::Array => f.write_str("array"),
        }
    }
}

/// Source location that issued an allocation request.
///
/// Only allocation requests carry provenance; deallocation requests cannot
/// be augmented with it, so release diagnostics always point at the original
/// allocation site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CallSite {
    file: &'static str,
    line: i64,
}

impl CallSite {
    /// Placeholder provenance for allocations whose call site could not be
    /// instrumented, such as allocations made inside opaque library code.
    ///
    /// Renders as `UNKNOWN:-1` in diagnostics.
    pub const UNKNOWN: Self = Self {
        file: "UNKNOWN",
        line: -1,
    };

    /// Creates a call site from an explicit file and line.
    #[must_use]
    pub const fn new(file: &'static str, line: i64) -> Self {
        Self { file, line }
    }

    /// Captures the caller's source location.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: i64::from(location.line()),
        }
    }

    /// The source file of the allocation request.
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// The line within [`file`][Self::file] of the allocation request.
    #[must_use]
    pub const fn line(&self) -> i64 {
        self.line
    }

    /// Whether this call site carries real provenance.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.line >= 0
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Snapshot of one allocation known to the registry.
///
/// `Display` renders the leak-report line for the record:
/// `LEAK <size> bytes at <address> (allocated at <file>:<line>)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocationRecord {
    address: usize,
    size: usize,
    shape: AllocationShape,
    site: CallSite,
}

impl AllocationRecord {
    pub(crate) const fn new(
        address: usize,
        size: usize,
        shape: AllocationShape,
        site: CallSite,
    ) -> Self {
        Self {
            address,
            size,
            shape,
            site,
        }
    }

    /// Address of the allocated block. Unique among live records.
    #[must_use]
    pub const fn address(&self) -> usize {
        self.address
    }

    /// Requested size in bytes at allocation time.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Shape the allocation was requested with.
    #[must_use]
    pub const fn shape(&self) -> AllocationShape {
        self.shape
    }

    /// Best-effort provenance of the allocation request.
    #[must_use]
    pub const fn site(&self) -> CallSite {
        self.site
    }
}

impl fmt::Display for AllocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LEAK {} bytes at {:#x} (allocated at {})",
            self.size, self.address, self.site
        )
    }
}

/// Why a release attempt was rejected.
///
/// Rejection never leaves the record behind: the address is removed from the
/// registry (and the memory is physically freed by the interception layer)
/// regardless of the outcome, so a wrong-shape release does not additionally
/// surface as a leak at teardown.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ReleaseError {
    /// The address was never recorded, or was already released.
    #[error("{attempted} free of unknown pointer {address:#x}")]
    UnknownPointer {
        /// Address the deallocation targeted.
        address: usize,
        /// Shape the deallocation was requested with.
        attempted: AllocationShape,
    },

    /// The deallocation shape disagrees with the allocation shape.
    #[error(
        "{address:#x} (allocated at {site}) was allocated as {allocated}; \
         use {allocated} free instead of {attempted} free"
    )]
    ShapeMismatch {
        /// Address the deallocation targeted.
        address: usize,
        /// Provenance of the original allocation request.
        site: CallSite,
        /// Shape the allocation was made with.
        allocated: AllocationShape,
        /// Shape the deallocation was requested with.
        attempted: AllocationShape,
    },
}

/// One node of the registry's intrusive list.
struct Node {
    record: AllocationRecord,
    next: *mut Node,
}

/// The live-allocation set.
///
/// All node storage comes from [`raw`]; no operation here allocates through
/// the Rust global allocator, including the drain and visit paths.
pub(crate) struct Registry {
    head: *mut Node,
    len: usize,
}

// SAFETY: the node pointers are owned exclusively by this registry and only
// dereferenced through it; nothing here is tied to the creating thread.
unsafe impl Send for Registry {}

impl Registry {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    /// Inserts a record for a freshly performed allocation.
    ///
    /// A stale record under the same address is replaced: address reuse
    /// without an intercepted release means the earlier block is gone, and
    /// keeping its record would guarantee a false leak report. This keeps
    /// the one-record-per-address invariant.
    pub(crate) fn record(&mut self, record: AllocationRecord) {
        if let Some(stale) = self.extract(record.address()) {
            // SAFETY: `extract` unlinked the node; its storage came from
            //         `raw::allocate` and is released exactly once.
            unsafe { raw::release(stale.as_ptr().cast::<u8>()) };
        }

        let layout = Layout::new::<Node>();
        let node = raw::allocate(layout).cast::<Node>();
        if node.is_null() {
            // Bookkeeping storage exhaustion is an unrecoverable host
            // allocator failure, not a reportable release outcome.
            handle_alloc_error(layout);
        }

        // SAFETY: just allocated for `Layout::new::<Node>()`, non-null,
        //         exclusively owned.
        unsafe {
            node.write(Node {
                record,
                next: self.head,
            });
        }
        self.head = node;
        self.len += 1;
    }

    /// Looks up and removes the record for `address`.
    ///
    /// The record is removed on every outcome, including a shape mismatch:
    /// the memory is considered reclaimed after any release attempt.
    pub(crate) fn release(
        &mut self,
        address: usize,
        attempted: AllocationShape,
    ) -> Result<(), ReleaseError> {
        let Some(node) = self.extract(address) else {
            return Err(ReleaseError::UnknownPointer { address, attempted });
        };

        // SAFETY: `extract` unlinked the node; it is exclusively ours now.
        let record = unsafe { node.as_ref() }.record;
        // SAFETY: node storage came from `raw::allocate`, released once.
        unsafe { raw::release(node.as_ptr().cast::<u8>()) };

        if record.shape() == attempted {
            Ok(())
        } else {
            Err(ReleaseError::ShapeMismatch {
                address,
                site: record.site(),
                allocated: record.shape(),
                attempted,
            })
        }
    }

    /// Removes every remaining record, invoking `visit` for each one in
    /// most-recent-first order.
    pub(crate) fn drain(&mut self, mut visit: impl FnMut(AllocationRecord)) {
        let mut node = mem::replace(&mut self.head, ptr::null_mut());
        self.len = 0;

        while let Some(current) = NonNull::new(node) {
            // SAFETY: the detached list is exclusively ours; each node was
            //         written fully initialized by `record`.
            let Node { record, next } = unsafe { current.as_ptr().read() };
            // SAFETY: node storage came from `raw::allocate`, released once.
            unsafe { raw::release(current.as_ptr().cast::<u8>()) };
            visit(record);
            node = next;
        }
    }

    /// Visits every live record in most-recent-first order without removing
    /// anything.
    pub(crate) fn for_each_live(&self, mut visit: impl FnMut(AllocationRecord)) {
        let mut node = self.head;
        while let Some(current) = NonNull::new(node) {
            // SAFETY: the node is owned by this registry and we hold a
            //         borrow of it for the duration.
            let current = unsafe { current.as_ref() };
            visit(current.record);
            node = current.next;
        }
    }

    /// Number of live records.
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Unlinks and returns the node recorded for `address`, if any.
    fn extract(&mut self, address: usize) -> Option<NonNull<Node>> {
        let mut link: *mut *mut Node = &raw mut self.head;
        loop {
            // SAFETY: `link` points either at `self.head` or at the `next`
            //         field of a node this registry owns.
            let node = NonNull::new(unsafe { link.read() })?;
            // SAFETY: non-null node owned by this registry; `&mut self`
            //         guarantees exclusive access.
            let node_ref = unsafe { node.as_ref() };

            if node_ref.record.address() == address {
                // SAFETY: unlink by pointing the predecessor's link at the
                //         successor.
                unsafe { link.write(node_ref.next) };
                self.len -= 1;
                return Some(node);
            }

            // SAFETY: taking the address of a field of a live node; the
            //         pointer is not dereferenced past the node's lifetime.
            link = unsafe { &raw mut (*node.as_ptr()).next };
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.drain(|_record| {});
    }
}

/// The process-wide registry behind the interception layer.
///
/// A Rust global allocator must be `Sync`, so unlike the single-threaded
/// reference design the shared instance is serialized with a mutex. The lock
/// is never held across an allocation made through the intercepted path; see
/// the audit bypass in `allocator`.
static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

/// Runs `f` with the process-wide registry locked.
pub(crate) fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    f(&mut REGISTRY.lock().expect(ERR_POISONED_LOCK))
}
