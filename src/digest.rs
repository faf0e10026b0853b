//! Deterministic row digests for replica-consistency checks.
//!
//! Two replicas that compacted the same logical data must produce identical
//! digest bytes, so the feed order is fixed: row metadata, column count, then
//! every column in ascending name order. Nothing here may depend on the
//! order sources were read in.

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{Error, Result};
use crate::family::ColumnFamily;
use crate::serialize::encode_column;

/// An externally-owned running hash. The merge never finalizes it; callers
/// fold in as many rows as the consistency check covers.
pub trait DigestSink {
    fn update(&mut self, data: &[u8]);
}

/// Feeds the row's canonical bytes into `sink`.
///
/// Any failure assembling the metadata is surfaced rather than swallowed: a
/// partial digest would falsely report replica agreement downstream.
pub fn update_digest(cf: &ColumnFamily, sink: &mut dyn DigestSink) -> Result<()> {
    let mut buffer = Vec::new();
    let deletion = cf.deletion();
    buffer
        .write_i64::<BigEndian>(deletion.marked_for_delete_at)
        .map_err(|e| Error::Encode("row deletion timestamp", e))?;
    buffer
        .write_i32::<BigEndian>(deletion.local_deletion_time)
        .map_err(|e| Error::Encode("row deletion time", e))?;
    buffer
        .write_u32::<BigEndian>(cf.column_count() as u32)
        .map_err(|e| Error::Encode("column count", e))?;
    sink.update(&buffer);

    for column in cf.iter() {
        buffer.clear();
        encode_column(column, &mut buffer)?;
        sink.update(&buffer);
    }
    Ok(())
}
