//! Order-Preserving Byte Escaping
//!
//! Multi-field keys are built by escaping each field and joining with a
//! reserved delimiter byte. Escaped output never contains the delimiter,
//! so fields can be split back apart unambiguously, and the substitution
//! is chosen so that concatenated escaped fields sort exactly like the
//! tuple of raw fields under unsigned lexicographic comparison.
//!
//! The delimiter and its `+1` sentinel are part of the on-disk format:
//! every encoder and decoder must be handed the same [`ByteLayout`].

use crate::error::{Error, Result};
use std::cmp::Ordering;

/// Byte-format constants threaded explicitly through every encoder,
/// decoder and range function.
///
/// For delimiter `d` the escape introducer is `e = d + 1`. Every raw
/// byte `<= e` is escaped, so escaped output contains no literal `d`
/// and every escaped sequence starts with a byte above `d`:
///
/// | raw byte  | escaped form   |
/// |-----------|----------------|
/// | `b < d`   | `[e, b]`       |
/// | `d`       | `[e, d + 1]`   |
/// | `e`       | `[e, d + 2]`   |
/// | other     | unchanged      |
///
/// The second byte of a `b < d` pair sorts below `d + 1` and `d + 2`,
/// which keeps escaped byte order equal to raw byte order for any
/// delimiter.
///
/// `d + 1` doubles as the exclusive-upper-bound sentinel appended to
/// range end rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteLayout {
    delimiter: u8,
}

impl ByteLayout {
    /// Store-wide default layout (delimiter 0).
    pub const DEFAULT: ByteLayout = ByteLayout { delimiter: 0 };

    /// Create a layout with an explicit delimiter.
    ///
    /// The delimiter must leave room for the two escape codes and the
    /// three direction-flag bytes above it.
    pub fn new(delimiter: u8) -> Result<Self> {
        if delimiter > 0xFC {
            return Err(Error::serialisation(format!(
                "delimiter {:#04x} leaves no room for escape codes and flags",
                delimiter
            )));
        }
        Ok(Self { delimiter })
    }

    /// The reserved field-boundary byte.
    #[inline]
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// The exclusive-upper-bound sentinel, `delimiter + 1`.
    #[inline]
    pub fn delimiter_plus_one(&self) -> u8 {
        self.delimiter + 1
    }

    #[inline]
    fn escape_char(&self) -> u8 {
        self.delimiter + 1
    }

    /// Escape `bytes` so the result contains no literal delimiter.
    pub fn escape(&self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len() + 2);
        self.escape_into(bytes, &mut out);
        out
    }

    /// Escape `bytes`, appending to `out`.
    pub fn escape_into(&self, bytes: &[u8], out: &mut Vec<u8>) {
        let d = self.delimiter;
        let e = self.escape_char();
        for &b in bytes {
            if b < d {
                out.push(e);
                out.push(b);
            } else if b == d {
                out.push(e);
                out.push(d + 1);
            } else if b == e {
                out.push(e);
                out.push(d + 2);
            } else {
                out.push(b);
            }
        }
    }

    /// Invert [`escape`](Self::escape).
    ///
    /// Fails on a dangling escape introducer or an unknown escape code;
    /// both indicate a corrupt field.
    pub fn unescape(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let d = self.delimiter;
        let e = self.escape_char();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == e {
                let code = *bytes
                    .get(i + 1)
                    .ok_or_else(|| Error::conversion("dangling escape introducer"))?;
                if code < d {
                    out.push(code);
                } else if code == d + 1 {
                    out.push(d);
                } else if code == d + 2 {
                    out.push(e);
                } else {
                    return Err(Error::conversion(format!(
                        "unknown escape code {:#04x}",
                        code
                    )));
                }
                i += 2;
            } else {
                out.push(b);
                i += 1;
            }
        }
        Ok(out)
    }
}

impl Default for ByteLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Standard lexicographic compare: common prefix first, then length.
pub fn compare_sorted_bytes(a: &[u8], b: &[u8]) -> Ordering {
    let common = a.len().min(b.len());
    for i in 0..common {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Fast-path equality for sorted corpora.
///
/// Neighbouring keys in a sorted corpus tend to share long prefixes and
/// diverge near the end, so the last byte is checked first.
pub fn are_sorted_bytes_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if a.is_empty() {
        return true;
    }
    let last = a.len() - 1;
    if a[last] != b[last] {
        return false;
    }
    a[..last] == b[..last]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        let layout = ByteLayout::DEFAULT;
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![1],
            vec![0, 1],
            vec![1, 0],
            vec![0, 0, 0],
            vec![1, 1, 1],
            vec![2, 0, 1, 255],
            vec![255, 254, 0],
            b"hello world".to_vec(),
        ];
        for case in cases {
            let escaped = layout.escape(&case);
            assert!(
                !escaped.contains(&layout.delimiter()),
                "escaped bytes must not contain the delimiter: {:?}",
                escaped
            );
            assert_eq!(layout.unescape(&escaped).unwrap(), case);
        }
    }

    #[test]
    fn test_escape_round_trip_exhaustive_short() {
        // Every sequence of length <= 2 over a boundary-heavy alphabet.
        let layout = ByteLayout::DEFAULT;
        let alphabet = [0u8, 1, 2, 3, 254, 255];
        for &a in &alphabet {
            let one = vec![a];
            assert_eq!(layout.unescape(&layout.escape(&one)).unwrap(), one);
            for &b in &alphabet {
                let two = vec![a, b];
                assert_eq!(layout.unescape(&layout.escape(&two)).unwrap(), two);
            }
        }
    }

    #[test]
    fn test_unescape_rejects_corrupt_input() {
        let layout = ByteLayout::DEFAULT;
        // Dangling introducer
        assert!(layout.unescape(&[1]).is_err());
        assert!(layout.unescape(&[5, 1]).is_err());
        // Unknown escape code
        assert!(layout.unescape(&[1, 7]).is_err());
    }

    #[test]
    fn test_nonzero_delimiter() {
        let layout = ByteLayout::new(0x10).unwrap();
        let data = vec![0x00, 0x05, 0x0F, 0x10, 0x11, 0x12];
        let escaped = layout.escape(&data);
        assert!(!escaped.contains(&0x10));
        assert_eq!(layout.unescape(&escaped).unwrap(), data);

        assert!(ByteLayout::new(0xFE).is_err());
    }

    #[test]
    fn test_nonzero_delimiter_escaped_fields_start_above_delimiter() {
        // The first byte of every escaped byte's encoding must sort
        // above the delimiter, or a joined key's field boundary would
        // not sort below the next field's content.
        let layout = ByteLayout::new(0x10).unwrap();
        for b in 0..=u8::MAX {
            let escaped = layout.escape(&[b]);
            assert!(
                escaped[0] > layout.delimiter(),
                "byte {:#04x} escapes to {:?}",
                b,
                escaped
            );
        }
    }

    #[test]
    fn test_nonzero_delimiter_order_preserved() {
        // Raw bytes below the delimiter used to pass through unescaped,
        // letting one vertex's row sort inside another vertex's range.
        let layout = ByteLayout::new(0x10).unwrap();
        let alphabet = [0x00u8, 0x05, 0x0F, 0x10, 0x11, 0x20, 0xFF];
        let mut fields: Vec<Vec<u8>> = vec![vec![]];
        for &a in &alphabet {
            fields.push(vec![a]);
            for &b in &alphabet {
                fields.push(vec![a, b]);
            }
        }

        for a1 in &fields {
            for b1 in &fields {
                for a2 in &fields {
                    for b2 in &fields {
                        let joined1 = join(&layout, a1, b1);
                        let joined2 = join(&layout, a2, b2);
                        let expected = (a1, b1).cmp(&(a2, b2));
                        assert_eq!(
                            compare_sorted_bytes(&joined1, &joined2),
                            expected,
                            "tuple ({:?}, {:?}) vs ({:?}, {:?})",
                            a1,
                            b1,
                            a2,
                            b2
                        );
                    }
                }
            }
        }
    }

    /// Joins escaped fields with the delimiter, as key assembly does.
    fn join(layout: &ByteLayout, a: &[u8], b: &[u8]) -> Vec<u8> {
        let mut out = layout.escape(a);
        out.push(layout.delimiter());
        out.extend_from_slice(&layout.escape(b));
        out
    }

    #[test]
    fn test_order_preserved_across_field_boundary() {
        // For all short two-field tuples over a boundary-heavy alphabet,
        // joined-escaped ordering must match tuple ordering.
        let layout = ByteLayout::DEFAULT;
        let alphabet = [0u8, 1, 2, 255];
        let mut fields: Vec<Vec<u8>> = vec![vec![]];
        for &a in &alphabet {
            fields.push(vec![a]);
            for &b in &alphabet {
                fields.push(vec![a, b]);
            }
        }

        for a1 in &fields {
            for b1 in &fields {
                for a2 in &fields {
                    for b2 in &fields {
                        let joined1 = join(&layout, a1, b1);
                        let joined2 = join(&layout, a2, b2);
                        let expected = (a1, b1).cmp(&(a2, b2));
                        assert_eq!(
                            compare_sorted_bytes(&joined1, &joined2),
                            expected,
                            "tuple ({:?}, {:?}) vs ({:?}, {:?})",
                            a1,
                            b1,
                            a2,
                            b2
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_compare_sorted_bytes() {
        assert_eq!(compare_sorted_bytes(b"a", b"a"), Ordering::Equal);
        assert_eq!(compare_sorted_bytes(b"a", b"ab"), Ordering::Less);
        assert_eq!(compare_sorted_bytes(b"ab", b"a"), Ordering::Greater);
        assert_eq!(compare_sorted_bytes(b"", b""), Ordering::Equal);
        assert_eq!(compare_sorted_bytes(b"", b"x"), Ordering::Less);
        assert_eq!(compare_sorted_bytes(&[0xFF], &[0x00]), Ordering::Greater);
    }

    #[test]
    fn test_are_sorted_bytes_equal() {
        assert!(are_sorted_bytes_equal(b"", b""));
        assert!(are_sorted_bytes_equal(b"a", b"a"));
        assert!(are_sorted_bytes_equal(b"same-prefix-1", b"same-prefix-1"));
        assert!(!are_sorted_bytes_equal(b"same-prefix-1", b"same-prefix-2"));
        assert!(!are_sorted_bytes_equal(b"a", b"ab"));
        assert!(!are_sorted_bytes_equal(b"xa", b"ya"));
        assert!(!are_sorted_bytes_equal(b"a", b""));
    }
}
