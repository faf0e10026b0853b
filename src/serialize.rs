//! Binary layout of a compacted row and the matching reader.
//!
//! Record layout, all integers big-endian:
//!
//! ```text
//! u64 total_length            covers everything after this field
//! u32 index_length            header region: the column index
//! index entries               u16 name len | name | u64 offset | u64 size
//! body                        i64 marked_for_delete_at | i32 deletion time
//!                             u32 column count | column records
//! ```
//!
//! Index offsets are relative to the start of the body, so a reader can seek
//! straight to one column without scanning the records before it. This is a
//! fixed contract with the table reader; do not reorder fields.

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::column::{Column, ColumnValue, DeletionInfo};
use crate::counter::{Shard, ShardSet};
use crate::error::{Error, Result};
use crate::family::ColumnFamily;

const FLAG_TOMBSTONE: u8 = 0x01;
const FLAG_COUNTER: u8 = 0x02;
const FLAG_EXPIRING: u8 = 0x04;

/// Sparse-free column index: one entry per column, in name order.
#[derive(Debug, Clone, Default)]
pub struct ColumnIndex {
    entries: Vec<(Vec<u8>, u64, u64)>, // name, body offset, record size
}

impl ColumnIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: Vec<u8>, offset: u64, size: u64) {
        self.entries.push((name, offset, size));
    }

    /// Binary-searches for an exact column name.
    pub fn find(&self, name: &[u8]) -> Option<(u64, u64)> {
        self.entries
            .binary_search_by(|entry| entry.0.as_slice().cmp(name))
            .ok()
            .map(|idx| (self.entries[idx].1, self.entries[idx].2))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        for (name, offset, size) in &self.entries {
            buffer
                .write_u16::<BigEndian>(checked_name_len(name)?)
                .map_err(|e| Error::Encode("index name length", e))?;
            buffer
                .write_all(name)
                .map_err(|e| Error::Encode("index name", e))?;
            buffer
                .write_u64::<BigEndian>(*offset)
                .map_err(|e| Error::Encode("index offset", e))?;
            buffer
                .write_u64::<BigEndian>(*size)
                .map_err(|e| Error::Encode("index size", e))?;
        }
        Ok(buffer)
    }

    fn decode(buffer: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buffer);
        let mut entries = Vec::new();
        while (cursor.position() as usize) < buffer.len() {
            let name_len = cursor
                .read_u16::<BigEndian>()
                .map_err(|e| Error::Decode("index name length", e))? as usize;
            let mut name = vec![0u8; name_len];
            cursor
                .read_exact(&mut name)
                .map_err(|e| Error::Decode("index name", e))?;
            let offset = cursor
                .read_u64::<BigEndian>()
                .map_err(|e| Error::Decode("index offset", e))?;
            let size = cursor
                .read_u64::<BigEndian>()
                .map_err(|e| Error::Decode("index size", e))?;
            entries.push((name, offset, size));
        }
        Ok(Self { entries })
    }
}

/// Column names are length-prefixed with a `u16`; anything longer cannot be
/// represented on the wire and must be rejected rather than truncated.
fn checked_name_len(name: &[u8]) -> Result<u16> {
    u16::try_from(name.len()).map_err(|_| {
        Error::InvalidState(format!(
            "column name of {} bytes exceeds the wire limit of {}",
            name.len(),
            u16::MAX
        ))
    })
}

/// Encodes one column record. Shared by the serializer and the digest path,
/// which hashes exactly these bytes.
pub fn encode_column(column: &Column, buffer: &mut Vec<u8>) -> Result<()> {
    let name_len = checked_name_len(&column.name)?;
    buffer
        .write_u16::<BigEndian>(name_len)
        .map_err(|e| Error::Encode("column name length", e))?;
    buffer
        .write_all(&column.name)
        .map_err(|e| Error::Encode("column name", e))?;

    let mut flags = 0u8;
    if column.is_tombstone() {
        flags |= FLAG_TOMBSTONE;
    }
    if column.is_counter() {
        flags |= FLAG_COUNTER;
    }
    if column.ttl.is_some() {
        flags |= FLAG_EXPIRING;
    }
    buffer
        .write_u8(flags)
        .map_err(|e| Error::Encode("column flags", e))?;
    buffer
        .write_i64::<BigEndian>(column.timestamp)
        .map_err(|e| Error::Encode("column timestamp", e))?;

    match &column.value {
        ColumnValue::Tombstone => buffer
            .write_i32::<BigEndian>(column.local_deletion_time)
            .map_err(|e| Error::Encode("column deletion time", e))?,
        ColumnValue::Counter(shards) => encode_shards(shards, buffer)?,
        ColumnValue::Value(value) => {
            if let Some(ttl) = column.ttl {
                buffer
                    .write_u32::<BigEndian>(ttl)
                    .map_err(|e| Error::Encode("column ttl", e))?;
                buffer
                    .write_i32::<BigEndian>(column.local_deletion_time)
                    .map_err(|e| Error::Encode("column expiry time", e))?;
            }
            buffer
                .write_u32::<BigEndian>(value.len() as u32)
                .map_err(|e| Error::Encode("column value length", e))?;
            buffer
                .write_all(value)
                .map_err(|e| Error::Encode("column value", e))?;
        }
    }
    Ok(())
}

fn encode_shards(shards: &ShardSet, buffer: &mut Vec<u8>) -> Result<()> {
    buffer
        .write_u16::<BigEndian>(shards.len() as u16)
        .map_err(|e| Error::Encode("shard count", e))?;
    for shard in shards.iter() {
        buffer
            .write_u64::<BigEndian>(shard.id)
            .map_err(|e| Error::Encode("shard id", e))?;
        buffer
            .write_i64::<BigEndian>(shard.clock)
            .map_err(|e| Error::Encode("shard clock", e))?;
        buffer
            .write_i64::<BigEndian>(shard.count)
            .map_err(|e| Error::Encode("shard count delta", e))?;
        match shard.deleted_at {
            Some(at) => {
                buffer
                    .write_u8(1)
                    .map_err(|e| Error::Encode("shard deleted flag", e))?;
                buffer
                    .write_i32::<BigEndian>(at)
                    .map_err(|e| Error::Encode("shard deletion time", e))?;
            }
            None => buffer
                .write_u8(0)
                .map_err(|e| Error::Encode("shard deleted flag", e))?,
        }
    }
    Ok(())
}

fn decode_column(cursor: &mut Cursor<&[u8]>) -> Result<Column> {
    let name_len = cursor
        .read_u16::<BigEndian>()
        .map_err(|e| Error::Decode("column name length", e))? as usize;
    let mut name = vec![0u8; name_len];
    cursor
        .read_exact(&mut name)
        .map_err(|e| Error::Decode("column name", e))?;
    let flags = cursor
        .read_u8()
        .map_err(|e| Error::Decode("column flags", e))?;
    let timestamp = cursor
        .read_i64::<BigEndian>()
        .map_err(|e| Error::Decode("column timestamp", e))?;

    if flags & FLAG_TOMBSTONE != 0 {
        let local_deletion_time = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| Error::Decode("column deletion time", e))?;
        return Ok(Column::tombstone(name, timestamp, local_deletion_time));
    }
    if flags & FLAG_COUNTER != 0 {
        let shards = decode_shards(cursor)?;
        return Ok(Column::counter(name, shards, timestamp));
    }

    let mut ttl = None;
    let mut local_deletion_time = i32::MIN;
    if flags & FLAG_EXPIRING != 0 {
        ttl = Some(
            cursor
                .read_u32::<BigEndian>()
                .map_err(|e| Error::Decode("column ttl", e))?,
        );
        local_deletion_time = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| Error::Decode("column expiry time", e))?;
    }
    let value_len = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| Error::Decode("column value length", e))? as usize;
    let mut value = vec![0u8; value_len];
    cursor
        .read_exact(&mut value)
        .map_err(|e| Error::Decode("column value", e))?;

    let mut column = Column::value(name, value, timestamp);
    if let Some(ttl) = ttl {
        column = column.with_ttl(ttl, local_deletion_time);
    }
    Ok(column)
}

fn decode_shards(cursor: &mut Cursor<&[u8]>) -> Result<ShardSet> {
    let count = cursor
        .read_u16::<BigEndian>()
        .map_err(|e| Error::Decode("shard count", e))? as usize;
    let mut shards = ShardSet::new();
    for _ in 0..count {
        let id = cursor
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("shard id", e))?;
        let clock = cursor
            .read_i64::<BigEndian>()
            .map_err(|e| Error::Decode("shard clock", e))?;
        let count = cursor
            .read_i64::<BigEndian>()
            .map_err(|e| Error::Decode("shard count delta", e))?;
        let deleted = cursor
            .read_u8()
            .map_err(|e| Error::Decode("shard deleted flag", e))?;
        let shard = if deleted != 0 {
            let at = cursor
                .read_i32::<BigEndian>()
                .map_err(|e| Error::Decode("shard deletion time", e))?;
            Shard {
                id,
                clock,
                count,
                deleted_at: Some(at),
            }
        } else {
            Shard {
                id,
                clock,
                count,
                deleted_at: None,
            }
        };
        shards.apply(shard);
    }
    Ok(shards)
}

/// Writes the full `[total_length][header][body]` record for a column
/// family.
pub fn write_row(cf: &ColumnFamily, out: &mut dyn Write) -> Result<()> {
    let mut body = Vec::new();
    let deletion = cf.deletion();
    body.write_i64::<BigEndian>(deletion.marked_for_delete_at)
        .map_err(|e| Error::Encode("row deletion timestamp", e))?;
    body.write_i32::<BigEndian>(deletion.local_deletion_time)
        .map_err(|e| Error::Encode("row deletion time", e))?;
    body.write_u32::<BigEndian>(cf.column_count() as u32)
        .map_err(|e| Error::Encode("column count", e))?;

    let mut index = ColumnIndex::new();
    for column in cf.iter() {
        let offset = body.len() as u64;
        encode_column(column, &mut body)?;
        let size = body.len() as u64 - offset;
        index.push(column.name.clone(), offset, size);
    }

    let header = index.encode()?;
    let total_length = (4 + header.len() + body.len()) as u64;
    out.write_u64::<BigEndian>(total_length)
        .map_err(|e| Error::WriteError("row length prefix", e))?;
    out.write_u32::<BigEndian>(header.len() as u32)
        .map_err(|e| Error::WriteError("row header length", e))?;
    out.write_all(&header)
        .map_err(|e| Error::WriteError("row header", e))?;
    out.write_all(&body)
        .map_err(|e| Error::WriteError("row body", e))?;
    Ok(())
}

/// Splits a serialized record into its index and body regions.
fn split_record(data: &[u8]) -> Result<(ColumnIndex, &[u8])> {
    let mut cursor = Cursor::new(data);
    let total_length = cursor
        .read_u64::<BigEndian>()
        .map_err(|e| Error::Decode("row length prefix", e))?;
    // The prefix is untrusted input; validate before any arithmetic or
    // slicing with it.
    let total_length = usize::try_from(total_length)
        .ok()
        .filter(|len| *len <= data.len().saturating_sub(8))
        .ok_or_else(|| {
            Error::CorruptedRow(format!(
                "record truncated: length prefix says {} bytes, {} available",
                total_length,
                data.len().saturating_sub(8)
            ))
        })?;
    let index_length = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| Error::Decode("row header length", e))? as usize;
    let header_start = 12;
    let body_start = header_start + index_length;
    if index_length > total_length.saturating_sub(4) {
        return Err(Error::CorruptedRow(
            "header length exceeds record".to_string(),
        ));
    }
    let index = ColumnIndex::decode(&data[header_start..body_start])?;
    Ok((index, &data[body_start..8 + total_length]))
}

/// Reconstructs the full column family from a serialized record.
pub fn read_row(data: &[u8]) -> Result<ColumnFamily> {
    let (_, body) = split_record(data)?;
    let mut cursor = Cursor::new(body);
    let marked_for_delete_at = cursor
        .read_i64::<BigEndian>()
        .map_err(|e| Error::Decode("row deletion timestamp", e))?;
    let local_deletion_time = cursor
        .read_i32::<BigEndian>()
        .map_err(|e| Error::Decode("row deletion time", e))?;
    let column_count = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| Error::Decode("column count", e))?;

    let mut cf = ColumnFamily::new();
    cf.delete(DeletionInfo::new(marked_for_delete_at, local_deletion_time));
    for _ in 0..column_count {
        cf.add_column(decode_column(&mut cursor)?);
    }
    Ok(cf)
}

/// Decodes a single column through the header index without scanning the
/// body.
pub fn read_column(data: &[u8], name: &[u8]) -> Result<Option<Column>> {
    let (index, body) = split_record(data)?;
    let Some((offset, size)) = index.find(name) else {
        return Ok(None);
    };
    let (start, end) = (offset as usize, (offset + size) as usize);
    if end > body.len() {
        return Err(Error::CorruptedRow(
            "index entry points past body".to_string(),
        ));
    }
    let mut cursor = Cursor::new(&body[start..end]);
    decode_column(&mut cursor).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{Shard, ShardSet};

    fn sample_family() -> ColumnFamily {
        let mut cf = ColumnFamily::new();
        cf.delete(DeletionInfo::new(3, 40));
        cf.add_column(Column::value("alpha", "one", 10));
        cf.add_column(Column::tombstone("beta", 12, 99));
        cf.add_column(Column::value("gamma", "ttl", 8).with_ttl(60, 500));
        cf.add_column(Column::counter(
            "hits",
            ShardSet::from_shards([Shard::new(1, 5, 3), Shard::deleted(2, 2, 7)]),
            6,
        ));
        cf
    }

    #[test]
    fn test_round_trip() {
        let cf = sample_family();
        let mut record = Vec::new();
        write_row(&cf, &mut record).expect("write should succeed");

        let decoded = read_row(&record).expect("read should succeed");
        assert_eq!(decoded, cf);
    }

    #[test]
    fn test_length_prefix_covers_header_and_body() {
        let cf = sample_family();
        let mut record = Vec::new();
        write_row(&cf, &mut record).expect("write should succeed");

        let mut cursor = Cursor::new(record.as_slice());
        let total = cursor.read_u64::<BigEndian>().unwrap() as usize;
        assert_eq!(total, record.len() - 8);
    }

    #[test]
    fn test_indexed_column_lookup() {
        let cf = sample_family();
        let mut record = Vec::new();
        write_row(&cf, &mut record).expect("write should succeed");

        let column = read_column(&record, b"beta")
            .expect("read should succeed")
            .expect("beta should be indexed");
        assert_eq!(&column, cf.get(b"beta").unwrap());

        assert!(read_column(&record, b"missing").unwrap().is_none());
    }

    #[test]
    fn test_write_through_file() {
        use std::fs;
        use std::io::Write as _;

        let cf = sample_family();
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("row.bin");

        let mut file = fs::File::create(&path).expect("Failed to create file");
        write_row(&cf, &mut file).expect("write should succeed");
        file.flush().expect("Failed to flush");

        let record = fs::read(&path).expect("Failed to read back");
        assert_eq!(read_row(&record).expect("read should succeed"), cf);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let cf = sample_family();
        let mut record = Vec::new();
        write_row(&cf, &mut record).expect("write should succeed");
        record.truncate(record.len() - 1);

        assert!(matches!(read_row(&record), Err(Error::CorruptedRow(_))));
    }

    #[test]
    fn test_huge_length_prefix_is_rejected() {
        let cf = sample_family();
        let mut record = Vec::new();
        write_row(&cf, &mut record).expect("write should succeed");

        // Corrupt the length prefix to the maximum value; the reader must
        // report corruption, not overflow.
        record[..8].copy_from_slice(&u64::MAX.to_be_bytes());

        assert!(matches!(read_row(&record), Err(Error::CorruptedRow(_))));
        assert!(matches!(
            read_column(&record, b"alpha"),
            Err(Error::CorruptedRow(_))
        ));
    }

    #[test]
    fn test_oversized_column_name_is_rejected() {
        let mut cf = ColumnFamily::new();
        cf.add_column(Column::value(vec![b'n'; u16::MAX as usize + 1], "v", 1));

        let mut record = Vec::new();
        assert!(matches!(
            write_row(&cf, &mut record),
            Err(Error::InvalidState(_))
        ));
    }
}
