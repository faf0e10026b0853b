//! The merged column map for one partition key.
//!
//! Columns live in a `BTreeMap` keyed by name so every traversal (serialize,
//! digest) sees ascending byte order regardless of how sources were fed in.

use std::collections::BTreeMap;

use crate::column::{reconcile, Column, ColumnValue, DeletionInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamily {
    columns: BTreeMap<Vec<u8>, Column>,
    deletion: DeletionInfo,
}

impl ColumnFamily {
    pub fn new() -> Self {
        Self {
            columns: BTreeMap::new(),
            deletion: DeletionInfo::NONE,
        }
    }

    /// Raises the row-level deletion marker. Markers only ever grow.
    pub fn delete(&mut self, deletion: DeletionInfo) {
        self.deletion = self.deletion.merge(&deletion);
    }

    pub fn deletion(&self) -> DeletionInfo {
        self.deletion
    }

    /// Inserts a column, resolving against any existing version of the same
    /// name.
    pub fn add_column(&mut self, column: Column) {
        match self.columns.remove(&column.name) {
            Some(existing) => {
                let winner = reconcile(existing, column);
                self.columns.insert(winner.name.clone(), winner);
            }
            None => {
                self.columns.insert(column.name.clone(), column);
            }
        }
    }

    /// Folds another column family for the same key into this one.
    pub fn add_all(&mut self, other: ColumnFamily) {
        self.delete(other.deletion);
        for (_, column) in other.columns {
            self.add_column(column);
        }
    }

    /// Physically removes purgeable data: columns shadowed by the row-level
    /// tombstone, and tombstone or expired columns whose deletion time
    /// precedes `gc_before`. Shadowed columns are dropped regardless of
    /// `gc_before`; the row marker that shadows them is still the authority
    /// for older data on other replicas, so it survives on its own schedule.
    pub fn remove_deleted(&mut self, gc_before: i32) {
        let deletion = self.deletion;
        self.columns.retain(|_, column| {
            if deletion.shadows(column.timestamp) {
                return false;
            }
            match column.value {
                ColumnValue::Tombstone => column.local_deletion_time >= gc_before,
                _ => column.ttl.is_none() || column.local_deletion_time >= gc_before,
            }
        });
    }

    /// Runs shard consolidation over every counter column. Invoked only for
    /// commutative column families.
    pub fn consolidate_counters(&mut self, gc_before: i32) {
        for column in self.columns.values_mut() {
            if let ColumnValue::Counter(shards) = &mut column.value {
                shards.consolidate(gc_before);
            }
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &[u8]) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Columns in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    /// Max write timestamp across columns and the row deletion marker.
    pub fn max_timestamp(&self) -> i64 {
        self.columns
            .values()
            .map(|c| c.timestamp)
            .fold(self.deletion.marked_for_delete_at, i64::max)
    }
}

impl Default for ColumnFamily {
    fn default() -> Self {
        Self::new()
    }
}
