//! Input sources for a merge and the skip-on-failure reporting hook.

use crate::error::{Error, Result};
use crate::family::ColumnFamily;
use crate::fmt::Raw;

/// Everything one source contributes for a partition key: its columns plus
/// any row-level deletion marker it carries.
pub type SourceColumnSet = ColumnFamily;

/// One input to a merge, typically backed by an SSTable scan positioned at
/// the partition key. Reading may fail recoverably (torn block, bad
/// checksum); the merge skips such sources rather than aborting the pass.
pub trait SourceReader {
    /// Identifies the source in skip reports, e.g. a table file path.
    fn source_id(&self) -> &str;

    /// Materializes this source's column set for `key`.
    fn read_columns(&mut self, key: &[u8]) -> Result<SourceColumnSet>;
}

/// Receives the report when a source is skipped. Injected so the merge core
/// carries no process-wide logging state and tests can assert on reports.
pub trait ErrorSink {
    fn source_failed(&mut self, key: &[u8], source_id: &str, err: &Error);
}

/// Stock sink that emits a structured `tracing` event per skipped source.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn source_failed(&mut self, key: &[u8], source_id: &str, err: &Error) {
        tracing::error!(
            key = %Raw::bytes(key),
            source = source_id,
            error = %err,
            "Skipping unreadable source during row compaction"
        );
    }
}

/// In-memory source used by tests and by callers that already hold the
/// column set.
#[derive(Debug)]
pub struct MemorySource {
    id: String,
    columns: Option<SourceColumnSet>,
}

impl MemorySource {
    pub fn new(id: impl Into<String>, columns: SourceColumnSet) -> Self {
        Self {
            id: id.into(),
            columns: Some(columns),
        }
    }

    /// A source that always fails its read.
    pub fn unreadable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            columns: None,
        }
    }
}

impl SourceReader for MemorySource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn read_columns(&mut self, _key: &[u8]) -> Result<SourceColumnSet> {
        match &self.columns {
            Some(columns) => Ok(columns.clone()),
            None => Err(Error::SourceUnreadable(self.id.clone())),
        }
    }
}
