use std::fmt;

use crc::{Algorithm, Crc};

use crate::digest::DigestSink;

pub const CRC_64_ECMA: Algorithm<u64> = crc::CRC_64_ECMA_182;

/// Incremental CRC-64 hasher. Used as the stock [`DigestSink`] when callers
/// do not bring their own running hash.
#[derive(Clone)]
pub struct Hasher {
    crc64: Crc<u64>,
    buffer: Vec<u8>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            crc64: Crc::<u64>::new(&CRC_64_ECMA),
            buffer: Vec::new(),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn checksum(&self) -> u64 {
        self.crc64.checksum(&self.buffer)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestSink for Hasher {
    fn update(&mut self, data: &[u8]) {
        self.write(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_updates_match_single_write() {
        let mut incremental = Hasher::new();
        incremental.update(b"row ");
        incremental.update(b"metadata");

        let mut single = Hasher::new();
        single.update(b"row metadata");

        assert_eq!(
            incremental.checksum(),
            single.checksum(),
            "chunking must not affect the digest"
        );
    }

    #[test]
    fn test_reset_allows_reuse_across_rows() {
        let mut hasher = Hasher::new();
        hasher.update(b"first row");
        let first = hasher.checksum();

        hasher.reset();
        hasher.update(b"first row");

        assert_eq!(first, hasher.checksum());
    }

    #[test]
    fn test_different_rows_diverge() {
        let mut a = Hasher::new();
        a.update(b"replica a");
        let mut b = Hasher::new();
        b.update(b"replica b");

        assert_ne!(a.checksum(), b.checksum());
    }
}
