//! In-memory row-compaction merge engine for log-structured storage.
//!
//! Given one partition key and the column sets that several on-disk tables
//! hold for it, [`MergedRow::merge`] produces the single canonical row:
//! column conflicts resolve by timestamp, tombstones mask and eventually
//! purge shadowed data, and counter columns reconcile shard-wise so repeated
//! compactions never double-count. The result serializes to a
//! length-prefixed header+body record and feeds a deterministic digest used
//! to detect replica divergence.

pub mod column;
pub mod controller;
pub mod counter;
pub mod digest;
pub mod error;
pub mod family;
pub mod fmt;
pub mod hasher;
pub mod row;
pub mod serialize;
pub mod source;

pub use column::{Column, ColumnValue, DeletionInfo};
pub use controller::{CompactionController, CompactionPass};
pub use counter::{Shard, ShardSet};
pub use digest::DigestSink;
pub use error::{Error, Result};
pub use family::ColumnFamily;
pub use hasher::Hasher;
pub use row::{CompactedRow, MergedRow};
pub use source::{ErrorSink, MemorySource, SourceColumnSet, SourceReader, TracingSink};
