//! Store Keys and Scan Ranges
//!
//! A key is the five-field tuple the sorted store orders by. All fields
//! are compared as unsigned bytes, field by field, in declaration order —
//! which is exactly what the derived `Ord` on `Vec<u8>` fields gives us.

use serde::{Deserialize, Serialize};

/// The value half of a stored cell: the serialised non-group-by
/// property bag.
pub type Value = Vec<u8>;

/// A full store key.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Escaped vertex, or escaped source/destination pair plus direction
    /// flag for edges
    pub row: Vec<u8>,
    /// Escaped group name
    pub column_family: Vec<u8>,
    /// Escaped, delimiter-joined group-by property values
    pub column_qualifier: Vec<u8>,
    /// Visibility label (opaque here)
    pub visibility: Vec<u8>,
    pub timestamp: u64,
}

impl Key {
    /// A row-only key: sorts before every full key sharing the row.
    /// Used for range bounds.
    pub fn from_row(row: Vec<u8>) -> Self {
        Self {
            row,
            ..Default::default()
        }
    }

    pub fn new(row: Vec<u8>, column_family: Vec<u8>, column_qualifier: Vec<u8>) -> Self {
        Self {
            row,
            column_family,
            column_qualifier,
            visibility: Vec::new(),
            timestamp: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// True if the two keys are the same cell ignoring the timestamp —
    /// the equality under which values are merge candidates.
    pub fn same_cell(&self, other: &Key) -> bool {
        self.row == other.row
            && self.column_family == other.column_family
            && self.column_qualifier == other.column_qualifier
            && self.visibility == other.visibility
    }
}

/// A scan range with per-bound inclusivity.
///
/// Must bound exactly the keys relevant to a query: never omit a
/// matching key; extra keys are allowed only when the scan predicate
/// will exclude them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Range {
    pub start: Key,
    pub start_inclusive: bool,
    pub end: Key,
    pub end_inclusive: bool,
}

impl Range {
    /// Half-open range `[start, end)`.
    pub fn half_open(start: Key, end: Key) -> Self {
        Self {
            start,
            start_inclusive: true,
            end,
            end_inclusive: false,
        }
    }

    /// Closed range `[start, end]`.
    pub fn closed(start: Key, end: Key) -> Self {
        Self {
            start,
            start_inclusive: true,
            end,
            end_inclusive: true,
        }
    }

    /// Membership test under the key ordering.
    pub fn contains(&self, key: &Key) -> bool {
        let after_start = if self.start_inclusive {
            *key >= self.start
        } else {
            *key > self.start
        };
        let before_end = if self.end_inclusive {
            *key <= self.end
        } else {
            *key < self.end
        };
        after_start && before_end
    }
}
