//! The merged row: one partition key's canonical state after compaction.
//!
//! [`MergedRow::merge`] reads every source's column set, resolves conflicts
//! column by column, applies the purge policy, and reconciles counter shards.
//! The result is immutable; callers query it and emit it via
//! [`CompactedRow::write`] and [`CompactedRow::update_digest`].
//!
//! A streaming sibling that never materializes the full row would implement
//! the same [`CompactedRow`] trait; only this in-memory variant can offer
//! [`MergedRow::full_columns`].

use std::io::Write;

use crate::column::Column;
use crate::controller::CompactionController;
use crate::digest::{self, DigestSink};
use crate::error::Result;
use crate::family::ColumnFamily;
use crate::serialize;
use crate::source::{ErrorSink, SourceReader};

/// Capability surface shared by every compacted-row strategy.
pub trait CompactedRow {
    /// Emits the `[total_length][header][body]` record. No-op when empty.
    fn write(&self, out: &mut dyn Write) -> Result<()>;

    /// Feeds the row's canonical bytes into a running hash. No-op when
    /// empty.
    fn update_digest(&self, sink: &mut dyn DigestSink) -> Result<()>;

    fn is_empty(&self) -> bool;

    fn column_count(&self) -> usize;

    /// Max write timestamp across surviving columns and the row deletion
    /// marker.
    ///
    /// # Panics
    ///
    /// The row must not be empty; there is no timestamp to report for a row
    /// that compacted away.
    fn max_timestamp(&self) -> i64;
}

/// In-memory merged row. Appropriate only when one partition's merged state
/// fits comfortably in memory.
#[derive(Debug, Clone)]
pub struct MergedRow {
    key: Vec<u8>,
    family: Option<ColumnFamily>,
    gc_before: i32,
}

impl MergedRow {
    /// Merges the column sets of `sources` for `key` under the controller's
    /// policy.
    ///
    /// A source whose read fails is reported to `errors` once and skipped;
    /// the merge degrades to the remaining sources rather than failing the
    /// pass. With zero readable sources the result is the empty row.
    pub fn merge(
        controller: &dyn CompactionController,
        key: impl Into<Vec<u8>>,
        sources: &mut [&mut dyn SourceReader],
        errors: &mut dyn ErrorSink,
    ) -> MergedRow {
        let key = key.into();
        let gc_before = controller.gc_before();

        let mut family: Option<ColumnFamily> = None;
        for source in sources.iter_mut() {
            let columns = match source.read_columns(&key) {
                Ok(columns) => columns,
                Err(err) => {
                    errors.source_failed(&key, source.source_id(), &err);
                    continue;
                }
            };
            match family.as_mut() {
                Some(family) => family.add_all(columns),
                None => family = Some(columns),
            }
        }

        if let Some(family) = family.as_mut() {
            if controller.is_purge_eligible(&key) {
                family.remove_deleted(gc_before);
            }
            if controller.is_commutative() {
                family.consolidate_counters(gc_before);
            }
        }

        MergedRow {
            key,
            family,
            gc_before,
        }
    }

    /// Wraps an already-built column family, e.g. from a caller that
    /// assembles rows directly. No purge is applied and none ever will be:
    /// the stored threshold keeps every tombstone live.
    pub fn from_family(key: impl Into<Vec<u8>>, family: ColumnFamily) -> MergedRow {
        MergedRow {
            key: key.into(),
            family: Some(family),
            gc_before: i32::MAX,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The full materialized column map, for callers like secondary-index
    /// builders that need direct access rather than the serialized record.
    /// `None` when the row is in the explicit empty state.
    pub fn full_columns(&self) -> Option<&ColumnFamily> {
        self.family.as_ref()
    }

    /// Re-applies the purge pass once more against the stored threshold and
    /// reports whether anything would survive. Purge is idempotent, so on an
    /// already-purged row this only catches the case where the columns are
    /// gone and the row tombstone itself has expired.
    fn purged_away(&self, family: &ColumnFamily) -> bool {
        family.is_empty() && family.deletion().is_purgeable(self.gc_before)
    }
}

impl CompactedRow for MergedRow {
    fn write(&self, out: &mut dyn Write) -> Result<()> {
        match &self.family {
            Some(family) if !self.purged_away(family) => serialize::write_row(family, out),
            _ => Ok(()),
        }
    }

    fn update_digest(&self, sink: &mut dyn DigestSink) -> Result<()> {
        match &self.family {
            Some(family) if !self.purged_away(family) => digest::update_digest(family, sink),
            _ => Ok(()),
        }
    }

    fn is_empty(&self) -> bool {
        match &self.family {
            None => true,
            Some(family) => self.purged_away(family),
        }
    }

    fn column_count(&self) -> usize {
        self.family.as_ref().map_or(0, ColumnFamily::column_count)
    }

    fn max_timestamp(&self) -> i64 {
        assert!(
            !self.is_empty(),
            "max_timestamp queried on an empty merged row"
        );
        self.family
            .as_ref()
            .map(ColumnFamily::max_timestamp)
            .unwrap_or(i64::MIN)
    }
}

/// Convenience for tests and single-column callers.
impl MergedRow {
    pub fn column(&self, name: &[u8]) -> Option<&Column> {
        self.family.as_ref().and_then(|f| f.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnValue, DeletionInfo};
    use crate::controller::CompactionPass;
    use crate::counter::{Shard, ShardSet};
    use crate::error::Error;
    use crate::hasher::Hasher;
    use crate::source::MemorySource;

    /// Error sink that records every report.
    #[derive(Default)]
    struct RecordingSink {
        reports: Vec<(Vec<u8>, String)>,
    }

    impl ErrorSink for RecordingSink {
        fn source_failed(&mut self, key: &[u8], source_id: &str, _err: &Error) {
            self.reports.push((key.to_vec(), source_id.to_string()));
        }
    }

    fn family_with(columns: Vec<Column>) -> ColumnFamily {
        let mut cf = ColumnFamily::new();
        for column in columns {
            cf.add_column(column);
        }
        cf
    }

    fn merge_sources(
        pass: &CompactionPass,
        sources: Vec<MemorySource>,
        sink: &mut RecordingSink,
    ) -> MergedRow {
        let mut sources = sources;
        let mut refs: Vec<&mut dyn SourceReader> = sources
            .iter_mut()
            .map(|s| s as &mut dyn SourceReader)
            .collect();
        MergedRow::merge(pass, b"pk".to_vec(), &mut refs, sink)
    }

    fn record_of(row: &MergedRow) -> Vec<u8> {
        let mut out = Vec::new();
        row.write(&mut out).expect("write should succeed");
        out
    }

    fn checksum_of(row: &MergedRow) -> u64 {
        let mut hasher = Hasher::new();
        row.update_digest(&mut hasher).expect("digest should succeed");
        hasher.checksum()
    }

    #[test]
    fn test_latest_write_wins_across_sources() {
        let pass = CompactionPass::new(0);
        let mut sink = RecordingSink::default();

        let row = merge_sources(
            &pass,
            vec![
                MemorySource::new("a", family_with(vec![Column::value("bar", "1", 10)])),
                MemorySource::new("b", family_with(vec![Column::value("bar", "2", 5)])),
            ],
            &mut sink,
        );

        let bar = row.column(b"bar").expect("bar should survive");
        assert_eq!(bar.timestamp, 10);
        assert_eq!(bar.value, ColumnValue::Value(b"1".to_vec()));
    }

    #[test]
    fn test_merge_is_commutative_to_the_byte() {
        let a = family_with(vec![
            Column::value("bar", "1", 10),
            Column::tombstone("baz", 20, 100),
        ]);
        let b = family_with(vec![
            Column::value("bar", "2", 5),
            Column::value("qux", "9", 7),
        ]);
        let pass = CompactionPass::new(0);
        let mut sink = RecordingSink::default();

        let ab = merge_sources(
            &pass,
            vec![
                MemorySource::new("a", a.clone()),
                MemorySource::new("b", b.clone()),
            ],
            &mut sink,
        );
        let ba = merge_sources(
            &pass,
            vec![MemorySource::new("b", b), MemorySource::new("a", a)],
            &mut sink,
        );

        assert_eq!(record_of(&ab), record_of(&ba));
        assert_eq!(checksum_of(&ab), checksum_of(&ba));
    }

    #[test]
    fn test_tombstone_masks_older_value() {
        let pass = CompactionPass::new(0);
        let mut sink = RecordingSink::default();

        let row = merge_sources(
            &pass,
            vec![
                MemorySource::new("a", family_with(vec![Column::value("baz", "v", 15)])),
                MemorySource::new("b", family_with(vec![Column::tombstone("baz", 20, 100)])),
            ],
            &mut sink,
        );

        assert!(row.column(b"baz").expect("tombstone survives").is_tombstone());
    }

    #[test]
    fn test_purge_removes_expired_tombstone_and_empties_row() {
        let sources = || {
            vec![MemorySource::new(
                "a",
                family_with(vec![Column::tombstone("baz", 20, 20)]),
            )]
        };
        let mut sink = RecordingSink::default();

        let purged = merge_sources(
            &CompactionPass::new(25).purge_all(true),
            sources(),
            &mut sink,
        );
        assert!(purged.is_empty());
        assert_eq!(purged.column_count(), 0);

        let kept = merge_sources(
            &CompactionPass::new(25).purge_all(false),
            sources(),
            &mut sink,
        );
        assert!(!kept.is_empty());
        assert!(kept.column(b"baz").unwrap().is_tombstone());
    }

    #[test]
    fn test_live_row_tombstone_is_not_empty() {
        let mut cf = ColumnFamily::new();
        cf.delete(DeletionInfo::new(10, 500));
        let pass = CompactionPass::new(100).purge_all(true);
        let mut sink = RecordingSink::default();

        let row = merge_sources(&pass, vec![MemorySource::new("a", cf)], &mut sink);

        // Zero columns, but the row tombstone is still live and must be
        // written out.
        assert_eq!(row.column_count(), 0);
        assert!(!row.is_empty());
        assert!(!record_of(&row).is_empty());
        assert_eq!(row.max_timestamp(), 10);
    }

    #[test]
    fn test_purge_is_idempotent() {
        let pass = CompactionPass::new(50).purge_all(true);
        let mut sink = RecordingSink::default();
        let cf = family_with(vec![
            Column::tombstone("old", 5, 10),
            Column::value("keep", "v", 30),
        ]);

        let once = merge_sources(&pass, vec![MemorySource::new("a", cf)], &mut sink);

        // Feed the already-purged result back through a second merge with the
        // same policy.
        let twice = merge_sources(
            &pass,
            vec![MemorySource::new("a", once.full_columns().unwrap().clone())],
            &mut sink,
        );

        assert_eq!(record_of(&once), record_of(&twice));
    }

    #[test]
    fn test_counter_reconciliation_does_not_double_count() {
        let pass = CompactionPass::new(0).commutative(true);
        let mut sink = RecordingSink::default();

        let shards_a = ShardSet::from_shards([Shard::new(1, 10, 5), Shard::new(2, 3, 2)]);
        let shards_b = ShardSet::from_shards([Shard::new(1, 10, 5), Shard::new(3, 1, 4)]);

        let row = merge_sources(
            &pass,
            vec![
                MemorySource::new("a", family_with(vec![Column::counter("hits", shards_a, 4)])),
                MemorySource::new("b", family_with(vec![Column::counter("hits", shards_b, 6)])),
            ],
            &mut sink,
        );

        let hits = row.column(b"hits").expect("counter survives");
        match &hits.value {
            ColumnValue::Counter(shards) => {
                // Shard 1 appears in both sources; its delta counts once.
                assert_eq!(shards.total(), 5 + 2 + 4);
            }
            other => panic!("expected counter, got {:?}", other),
        }

        // Re-compacting the reconciled row with itself is a no-op.
        let again = merge_sources(
            &pass,
            vec![
                MemorySource::new("a", row.full_columns().unwrap().clone()),
                MemorySource::new("b", row.full_columns().unwrap().clone()),
            ],
            &mut sink,
        );
        assert_eq!(record_of(&row), record_of(&again));
    }

    #[test]
    fn test_failed_source_is_skipped_and_reported_once() {
        let pass = CompactionPass::new(0);
        let mut sink = RecordingSink::default();

        let a = family_with(vec![Column::value("x", "1", 1)]);
        let c = family_with(vec![Column::value("y", "2", 2)]);
        let row = merge_sources(
            &pass,
            vec![
                MemorySource::new("a", a.clone()),
                MemorySource::unreadable("b"),
                MemorySource::new("c", c.clone()),
            ],
            &mut sink,
        );

        assert_eq!(sink.reports.len(), 1);
        assert_eq!(sink.reports[0], (b"pk".to_vec(), "b".to_string()));

        // Result equals merging the readable sources alone.
        let mut sink2 = RecordingSink::default();
        let without_b = merge_sources(
            &pass,
            vec![MemorySource::new("a", a), MemorySource::new("c", c)],
            &mut sink2,
        );
        assert_eq!(record_of(&row), record_of(&without_b));
        assert!(sink2.reports.is_empty());
    }

    #[test]
    fn test_zero_readable_sources_yield_empty_row() {
        let pass = CompactionPass::new(0);
        let mut sink = RecordingSink::default();

        let row = merge_sources(
            &pass,
            vec![
                MemorySource::unreadable("a"),
                MemorySource::unreadable("b"),
            ],
            &mut sink,
        );

        assert!(row.is_empty());
        assert_eq!(row.column_count(), 0);
        assert!(row.full_columns().is_none());
        assert!(record_of(&row).is_empty());
        assert_eq!(checksum_of(&row), Hasher::new().checksum());
        assert_eq!(sink.reports.len(), 2);
    }

    #[test]
    #[should_panic(expected = "max_timestamp queried on an empty merged row")]
    fn test_max_timestamp_on_empty_row_panics() {
        let pass = CompactionPass::new(0);
        let mut sink = RecordingSink::default();
        let row = merge_sources(&pass, vec![], &mut sink);
        let _ = row.max_timestamp();
    }

    #[test]
    fn test_from_family_never_purges() {
        let cf = family_with(vec![Column::tombstone("t", 1, 1)]);
        let row = MergedRow::from_family(b"pk".to_vec(), cf);

        assert!(!row.is_empty());
        assert_eq!(row.column_count(), 1);
        assert_eq!(row.max_timestamp(), 1);
    }

    #[test]
    fn test_write_round_trips_through_reader() {
        let pass = CompactionPass::new(0);
        let mut sink = RecordingSink::default();
        let cf = family_with(vec![
            Column::value("alpha", "one", 10),
            Column::tombstone("beta", 12, 99),
        ]);

        let row = merge_sources(&pass, vec![MemorySource::new("a", cf)], &mut sink);
        let record = record_of(&row);

        let decoded = crate::serialize::read_row(&record).expect("read should succeed");
        assert_eq!(&decoded, row.full_columns().unwrap());
    }
}
