//! Columns, tombstones, and the conflict resolver.
//!
//! A column is one timestamped cell within a row. During compaction the same
//! column name can show up in several SSTables with different values;
//! [`reconcile`] picks the single winner. The rule must be a pure function of
//! the two versions, never of which source was read first, so that merging
//! the same SSTables in any order (or re-merging partial results) converges
//! on identical bytes.

use crate::counter::ShardSet;

/// One observed version of a column from one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: Vec<u8>,
    pub value: ColumnValue,
    /// Logical write timestamp.
    pub timestamp: i64,
    /// Wall-clock seconds of deletion or expiry. Meaningful only for
    /// tombstones and expiring columns.
    pub local_deletion_time: i32,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Value(Vec<u8>),
    Tombstone,
    Counter(ShardSet),
}

impl Column {
    pub fn value(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value: ColumnValue::Value(value.into()),
            timestamp,
            local_deletion_time: i32::MIN,
            ttl: None,
        }
    }

    pub fn tombstone(name: impl Into<Vec<u8>>, timestamp: i64, local_deletion_time: i32) -> Self {
        Self {
            name: name.into(),
            value: ColumnValue::Tombstone,
            timestamp,
            local_deletion_time,
            ttl: None,
        }
    }

    pub fn counter(name: impl Into<Vec<u8>>, shards: ShardSet, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value: ColumnValue::Counter(shards),
            timestamp,
            local_deletion_time: i32::MIN,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: u32, expires_at: i32) -> Self {
        self.ttl = Some(ttl);
        self.local_deletion_time = expires_at;
        self
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, ColumnValue::Tombstone)
    }

    pub fn is_counter(&self) -> bool {
        matches!(self.value, ColumnValue::Counter(_))
    }
}

/// Resolves two versions of the same column into the single winner.
///
/// Counter versions are unioned shard-wise instead of overwritten. For
/// everything else the higher timestamp wins; ties go to the tombstone, then
/// to the greater value bytes, then to the later deletion time. Comparing
/// content on ties (rather than taking whichever argument came second) is
/// what keeps the merge commutative.
pub fn reconcile(left: Column, right: Column) -> Column {
    debug_assert_eq!(left.name, right.name, "reconcile requires matching names");

    if let (ColumnValue::Counter(a), ColumnValue::Counter(b)) = (&left.value, &right.value) {
        let mut shards = a.clone();
        shards.merge(b);
        let timestamp = left.timestamp.max(right.timestamp);
        let local_deletion_time = left.local_deletion_time.max(right.local_deletion_time);
        return Column {
            name: left.name,
            value: ColumnValue::Counter(shards),
            timestamp,
            local_deletion_time,
            ttl: None,
        };
    }

    if left.timestamp != right.timestamp {
        return if left.timestamp > right.timestamp {
            left
        } else {
            right
        };
    }

    match (left.is_tombstone(), right.is_tombstone()) {
        (true, false) => left,
        (false, true) => right,
        (true, true) => {
            if left.local_deletion_time >= right.local_deletion_time {
                left
            } else {
                right
            }
        }
        (false, false) => {
            let lv = value_bytes(&left);
            let rv = value_bytes(&right);
            if lv >= rv {
                left
            } else {
                right
            }
        }
    }
}

fn value_bytes(column: &Column) -> &[u8] {
    match &column.value {
        ColumnValue::Value(v) => v,
        _ => &[],
    }
}

/// Row-level tombstone: shadows every column written at or before
/// `marked_for_delete_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionInfo {
    pub marked_for_delete_at: i64,
    pub local_deletion_time: i32,
}

impl DeletionInfo {
    /// The "no row deletion" marker: shadows nothing, always expirable.
    pub const NONE: DeletionInfo = DeletionInfo {
        marked_for_delete_at: i64::MIN,
        local_deletion_time: i32::MIN,
    };

    pub fn new(marked_for_delete_at: i64, local_deletion_time: i32) -> Self {
        Self {
            marked_for_delete_at,
            local_deletion_time,
        }
    }

    pub fn is_live(&self) -> bool {
        *self != Self::NONE
    }

    /// Field-wise max, so merging deletion markers from several sources is
    /// order-independent.
    pub fn merge(&self, other: &DeletionInfo) -> DeletionInfo {
        DeletionInfo {
            marked_for_delete_at: self.marked_for_delete_at.max(other.marked_for_delete_at),
            local_deletion_time: self.local_deletion_time.max(other.local_deletion_time),
        }
    }

    /// Whether this marker shadows a column written at `timestamp`.
    pub fn shadows(&self, timestamp: i64) -> bool {
        timestamp <= self.marked_for_delete_at
    }

    /// Whether the marker itself can be discarded at `gc_before`.
    pub fn is_purgeable(&self, gc_before: i32) -> bool {
        self.local_deletion_time < gc_before
    }
}
