//! Store Abstraction
//!
//! A store is any sorted key/value engine that can scan a set of row
//! ranges and run the scan-side predicate near the data. The in-memory
//! implementation in [`memory`] is the reference for what a backend must
//! do; it is also what the integration tests run against.

pub mod memory;

use crate::element::InOutType;
use crate::error::Result;
use crate::key::{Key, Range, Value};
use std::collections::BTreeMap;

/// Per-scan options handed to the store at open time.
///
/// The predicate travels as the opaque string option map produced by
/// [`ScanPredicateConfig::to_options`](crate::predicate::ScanPredicateConfig::to_options),
/// matching how a real backend's scan plugin receives it. Setup problems
/// in the map surface from `open_scan`, before any entry is read.
#[derive(Clone, Debug, Default)]
pub struct ScanOptions {
    /// Scan predicate option map; `None` scans unfiltered.
    pub predicate: Option<BTreeMap<String, String>>,
    /// Direction filter applied to edge rows.
    pub in_out: InOutType,
    /// Merge same-cell entries at scan time.
    pub aggregate: bool,
}

impl ScanOptions {
    pub fn unfiltered() -> Self {
        Self::default()
    }

    pub fn with_predicate(mut self, options: BTreeMap<String, String>) -> Self {
        self.predicate = Some(options);
        self
    }

    pub fn with_in_out(mut self, in_out: InOutType) -> Self {
        self.in_out = in_out;
        self
    }

    pub fn with_aggregate(mut self, aggregate: bool) -> Self {
        self.aggregate = aggregate;
        self
    }
}

/// A sorted store that can serve range scans.
pub trait Store {
    type Scan: ScanIter;

    /// Open a scan over the union of `ranges`.
    ///
    /// Fails with [`Error::StoreUnavailable`](crate::error::Error) when
    /// the store cannot serve scans at all, and with
    /// [`Error::PredicateConfig`](crate::error::Error) when the predicate
    /// option map is malformed.
    fn open_scan(&self, ranges: &[Range], options: &ScanOptions) -> Result<Self::Scan>;
}

/// A live scan. Holds store-side resources until closed.
pub trait ScanIter: Iterator<Item = (Key, Value)> {
    /// Release the scan's resources. Idempotent; also runs on drop.
    fn close(&mut self);
}
