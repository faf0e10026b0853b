//! Per-pass compaction policy supplied by the caller.

/// External policy a merge consults: the tombstone GC threshold, whether a
/// key's tombstones may be physically purged, and whether the column family
/// holds commutative (counter) values.
///
/// Purge eligibility is a cross-table/cross-replica fact ("no older data can
/// still be hidden behind this key's tombstones") that the merge core cannot
/// compute locally, so it is always asked, never inferred.
pub trait CompactionController {
    /// Tombstones with a deletion time before this may be discarded.
    fn gc_before(&self) -> i32;

    fn is_purge_eligible(&self, key: &[u8]) -> bool;

    fn is_commutative(&self) -> bool;
}

/// Fixed-policy controller covering the common case of one compaction pass
/// with a process-wide threshold.
#[derive(Debug, Clone)]
pub struct CompactionPass {
    gc_before: i32,
    purge_all: bool,
    commutative: bool,
}

impl CompactionPass {
    pub fn new(gc_before: i32) -> Self {
        Self {
            gc_before,
            purge_all: false,
            commutative: false,
        }
    }

    /// Declare every key purge-eligible for this pass.
    pub fn purge_all(mut self, purge: bool) -> Self {
        self.purge_all = purge;
        self
    }

    /// Declare the column family commutative (counter-valued).
    pub fn commutative(mut self, commutative: bool) -> Self {
        self.commutative = commutative;
        self
    }
}

impl CompactionController for CompactionPass {
    fn gc_before(&self) -> i32 {
        self.gc_before
    }

    fn is_purge_eligible(&self, _key: &[u8]) -> bool {
        self.purge_all
    }

    fn is_commutative(&self) -> bool {
        self.commutative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_builder() {
        let pass = CompactionPass::new(25).purge_all(true).commutative(true);

        assert_eq!(pass.gc_before(), 25);
        assert!(pass.is_purge_eligible(b"any"));
        assert!(pass.is_commutative());
    }

    #[test]
    fn test_pass_defaults_are_conservative() {
        let pass = CompactionPass::new(25);

        assert!(!pass.is_purge_eligible(b"any"));
        assert!(!pass.is_commutative());
    }
}
