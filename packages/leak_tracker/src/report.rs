//! Leak reporting surfaces.

use std::fmt;

use crate::allocator::BypassGuard;
use crate::registry::{self, AllocationRecord};

/// Point-in-time collection of allocation records, most recently allocated
/// first.
///
/// `Display` renders one `LEAK` line per record, the same lines a dropped
/// [`crate::Session`] prints at teardown.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LeakReport {
    records: Vec<AllocationRecord>,
}

impl LeakReport {
    pub(crate) fn new(records: Vec<AllocationRecord>) -> Self {
        Self { records }
    }

    /// The records in this report, most recently allocated first.
    #[must_use]
    pub fn records(&self) -> &[AllocationRecord] {
        &self.records
    }

    /// Number of records in this report.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether this report contains no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes each record's `LEAK` line to stderr.
    ///
    /// Prints nothing when the report is empty.
    #[cfg_attr(test, mutants::skip)] // Stderr output is verified manually.
    pub fn print_to_stderr(&self) {
        for record in &self.records {
            eprintln!("{record}");
        }
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "{record}")?;
        }
        Ok(())
    }
}

/// Snapshot of every allocation currently known to the registry, without
/// removing anything.
///
/// The snapshot's own storage is allocated with the audit bypass raised, so
/// taking it neither records itself nor re-enters the registry lock.
///
/// # Examples
///
/// ```
/// use leak_tracker::{live_allocations, tracked};
///
/// let value = tracked::alloc_scalar(1_u8);
/// let address = value.addr().get();
///
/// let live = live_allocations();
/// assert!(live.records().iter().any(|record| record.address() == address));
///
/// // SAFETY: allocated by `alloc_scalar` above, released exactly once.
/// unsafe {
///     tracked::free_scalar(value).expect("released with the matching shape");
/// }
/// ```
#[must_use]
pub fn live_allocations() -> LeakReport {
    let _bypass = BypassGuard::raise();
    let mut records = Vec::new();
    registry::with_registry(|registry| {
        registry.for_each_live(|record| records.push(record));
    });
    LeakReport::new(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AllocationShape, CallSite};

    fn sample() -> LeakReport {
        LeakReport::new(vec![
            AllocationRecord::new(
                0x2000,
                800,
                AllocationShape::Array,
                CallSite::new("f.rs", 20),
            ),
            AllocationRecord::new(0x1000, 4, AllocationShape::Scalar, CallSite::UNKNOWN),
        ])
    }

    #[test]
    fn display_renders_one_leak_line_per_record() {
        let rendered = sample().to_string();
        assert_eq!(
            rendered,
            "LEAK 800 bytes at 0x2000 (allocated at f.rs:20)\n\
             LEAK 4 bytes at 0x1000 (allocated at UNKNOWN:-1)\n"
        );
    }

    #[test]
    fn empty_report_renders_nothing() {
        let report = LeakReport::default();
        assert!(report.is_empty());
        assert_eq!(report.len(), 0);
        assert_eq!(report.to_string(), "");
    }

    #[test]
    fn records_preserve_order() {
        let report = sample();
        assert_eq!(report.len(), 2);
        let addresses: Vec<usize> = report
            .records()
            .iter()
            .map(AllocationRecord::address)
            .collect();
        assert_eq!(addresses, [0x2000, 0x1000]);
    }

    static_assertions::assert_impl_all!(LeakReport: Send, Sync);
}
