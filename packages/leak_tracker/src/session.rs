//! Audit session lifecycle.

use crate::allocator::BypassGuard;
use crate::registry;
use crate::report::{self, LeakReport};

/// Teardown trigger for the process-wide allocation audit.
///
/// Rust statics never run destructors, so the audited program marks the end
/// of its audited lifetime by holding a `Session` for the duration of
/// `main`. Dropping it drains the registry and prints one `LEAK` line to
/// stderr per allocation still live, most recently allocated first.
///
/// Draining means every record is reported at most once: if several sessions
/// exist, a later drop reports only what was recorded after the earlier one.
///
/// # Examples
///
/// ```
/// use leak_tracker::{Allocator, Session, tracked};
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
///
/// fn main() {
///     let session = Session::new();
///
///     let _leaked = tracked::alloc_array::<u8>(800);
///
///     // Prints `LEAK 800 bytes at ... (allocated at ...)` among the
///     // remaining records.
///     drop(session);
/// }
/// ```
#[derive(Debug)]
pub struct Session {
    _private: (),
}

impl Session {
    /// Creates a new audit session.
    #[expect(
        clippy::new_without_default,
        reason = "a session marks an audited lifetime; constructing one should be a visible act, not an ambient default"
    )]
    #[must_use]
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Non-draining snapshot of every allocation currently live.
    ///
    /// Equivalent to [`crate::live_allocations`].
    #[must_use]
    pub fn leak_report(&self) -> LeakReport {
        report::live_allocations()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _bypass = BypassGuard::raise();
        registry::with_registry(|registry| {
            registry.drain(|record| eprintln!("{record}"));
        });
    }
}
