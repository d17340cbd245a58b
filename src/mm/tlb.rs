//! TLB invalidation bookkeeping.
//!
//! There is no hardware MMU behind this hosted substrate (boot/MMU
//! enablement is out of scope, per §1), so there is no real TLB to
//! shoot down. This module keeps the teacher's *scoping discipline* —
//! `keos::mm::tlb` flushes a single page when a directory currently
//! loaded on this CPU loses one mapping, and reloads the whole root
//! only when more than one mapping changed, and never shoots down
//! other CPUs' TLBs — as an explicit, testable record of which flush
//! a call path would have issued, rather than silently doing nothing.
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts of the two flush shapes the page-table manager issues.
#[derive(Default)]
pub struct TlbStats {
    single_page: AtomicU64,
    full_reload: AtomicU64,
}

impl TlbStats {
    /// A single-page invalidation, e.g. after one COW fault installs a
    /// new frame (§4.1 `pagefault`).
    pub fn flush_page(&self) {
        self.single_page.fetch_add(1, Ordering::Relaxed);
    }

    /// A full root reload, e.g. after `copy`/`merge` touch a whole 4 MB
    /// region's worth of entries at once.
    pub fn flush_all(&self) {
        self.full_reload.fetch_add(1, Ordering::Relaxed);
    }

    /// Total flushes issued, for tests that assert a path actually
    /// invalidated something.
    pub fn total(&self) -> u64 {
        self.single_page.load(Ordering::Relaxed) + self.full_reload.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_scoped() {
        let stats = TlbStats::default();
        stats.flush_page();
        stats.flush_page();
        stats.flush_all();
        assert_eq!(stats.total(), 3);
    }
}
