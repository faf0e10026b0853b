//! Formats raw keys and column names for log and error messages. Partition
//! keys are arbitrary bytes, so everything goes through ASCII escaping.

use itertools::Itertools as _;

/// Formats raw byte slices without any decoding.
pub struct Raw;

impl Raw {
    /// Formats raw bytes as escaped ASCII strings.
    pub fn bytes(bytes: &[u8]) -> String {
        let escaped = bytes
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        format!("\"{}\"", String::from_utf8_lossy(&escaped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_bytes() {
        assert_eq!(Raw::bytes(b"key1"), "\"key1\"");
    }

    #[test]
    fn test_non_utf8_bytes_are_escaped() {
        assert_eq!(Raw::bytes(&[0xff, 0x00, b'a']), "\"\\xff\\x00a\"");
    }
}
