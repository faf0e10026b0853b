//! Shard sets for commutative (counter) columns.
//!
//! A counter column's value is not a single register but a set of per-replica
//! shards, each carrying a count delta and a clock. Compaction must union
//! shard sets from different sources rather than letting one overwrite the
//! other: two SSTables can each hold a partial view of the same counter, and
//! blindly summing or overwriting would double-count on the next compaction
//! of the same data. Matching shards (same id) are reconciled by clock, which
//! makes the union idempotent.

use std::collections::BTreeMap;

/// One replica's contribution to a counter column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: u64,
    pub clock: i64,
    pub count: i64,
    /// Wall-clock seconds at which this shard was deleted, if it was.
    pub deleted_at: Option<i32>,
}

impl Shard {
    pub fn new(id: u64, clock: i64, count: i64) -> Self {
        Self {
            id,
            clock,
            count,
            deleted_at: None,
        }
    }

    pub fn deleted(id: u64, clock: i64, deleted_at: i32) -> Self {
        Self {
            id,
            clock,
            count: 0,
            deleted_at: Some(deleted_at),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// An unordered collection of counter shards, keyed by shard id. At most one
/// shard is retained per id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardSet {
    shards: BTreeMap<u64, Shard>,
}

impl ShardSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_shards(shards: impl IntoIterator<Item = Shard>) -> Self {
        let mut set = Self::new();
        for shard in shards {
            set.apply(shard);
        }
        set
    }

    /// Folds a single shard into the set. When a shard with the same id is
    /// already present, the one with the higher clock wins; equal clocks keep
    /// the higher count so the result never depends on arrival order.
    pub fn apply(&mut self, shard: Shard) {
        let superseded = self
            .shards
            .get(&shard.id)
            .is_some_and(|existing| (existing.clock, existing.count) >= (shard.clock, shard.count));
        if !superseded {
            self.shards.insert(shard.id, shard);
        }
    }

    /// Unions another shard set into this one, shard by shard. Re-merging a
    /// set with itself leaves the total unchanged.
    pub fn merge(&mut self, other: &ShardSet) {
        for shard in other.shards.values() {
            self.apply(shard.clone());
        }
    }

    /// Drops shards whose deletion marker expired before `gc_before`. Deleted
    /// shards never contribute to [`total`](Self::total), so the live count
    /// is preserved exactly; re-running with the same threshold is a no-op.
    pub fn consolidate(&mut self, gc_before: i32) {
        self.shards
            .retain(|_, shard| shard.deleted_at.map_or(true, |at| at >= gc_before));
    }

    /// The logical value of the counter: the sum of all live shard deltas.
    pub fn total(&self) -> i64 {
        self.shards
            .values()
            .filter(|s| !s.is_deleted())
            .map(|s| s.count)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Shards in ascending id order, for canonical serialization and
    /// digesting.
    pub fn iter(&self) -> impl Iterator<Item = &Shard> {
        self.shards.values()
    }
}
