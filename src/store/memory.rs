//! In-Memory Reference Store
//!
//! A sorted map behind a lock, with the full scan pipeline a real
//! backend would run near the data: range union, scan predicate,
//! direction filter, same-cell aggregation. Scans materialise their
//! result at open time, so a predicate setup or decode failure surfaces
//! from `open_scan` before the caller sees a single entry.
//!
//! The store counts its live scans; tests use the count to check that
//! iterators release what they open.

use crate::element::{DirectionFlag, InOutType, Properties};
use crate::error::{Error, Result};
use crate::escape::ByteLayout;
use crate::key::{Key, Range, Value};
use crate::predicate::{ScanPredicate, ScanPredicateConfig};
use crate::schema::Schema;
use crate::store::{ScanIter, ScanOptions, Store};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared in-memory store. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cells: RwLock<BTreeMap<Key, Value>>,
    clock: AtomicU64,
    open_scans: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one cell, stamping it with the next clock tick so repeated
    /// puts of the same cell coexist until scan-time aggregation.
    pub fn put(&self, key: Key, value: Value) {
        let ts = self.inner.clock.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.cells.write().insert(key.with_timestamp(ts), value);
    }

    pub fn put_pairs(&self, pairs: impl IntoIterator<Item = (Key, Value)>) {
        for (key, value) in pairs {
            self.put(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cells.read().is_empty()
    }

    /// Number of scans opened and not yet closed.
    pub fn open_scan_count(&self) -> usize {
        self.inner.open_scans.load(Ordering::SeqCst)
    }

    /// Test switch: make every subsequent `open_scan` fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn collect(&self, ranges: &[Range]) -> BTreeMap<Key, Value> {
        let cells = self.inner.cells.read();
        let mut selected = BTreeMap::new();
        for range in ranges {
            if range.end < range.start {
                continue;
            }
            for (key, value) in cells.range(range.start.clone()..=range.end.clone()) {
                if range.contains(key) {
                    selected.insert(key.clone(), value.clone());
                }
            }
        }
        selected
    }
}

impl Store for MemStore {
    type Scan = MemScan;

    fn open_scan(&self, ranges: &[Range], options: &ScanOptions) -> Result<Self::Scan> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable("memory store marked unavailable"));
        }

        // Predicate setup is validated in full before any entry is read.
        let config = options
            .predicate
            .as_ref()
            .map(ScanPredicateConfig::from_options)
            .transpose()?;
        let layout = config.as_ref().map_or(ByteLayout::DEFAULT, |c| c.layout);
        let predicate = config.clone().map(ScanPredicate::new);

        let mut entries: Vec<(Key, Value)> = Vec::new();
        for (key, value) in self.collect(ranges) {
            if let Some(predicate) = &predicate {
                if !predicate.accept(&key, &value)? {
                    continue;
                }
            }
            if !direction_allows(&key, options.in_out, &layout) {
                continue;
            }
            entries.push((key, value));
        }

        if options.aggregate {
            let config = config.ok_or_else(|| {
                Error::predicate_config("aggregation requires a scan predicate option map")
            })?;
            entries = aggregate_same_cells(entries, &config.schema, &layout)?;
        }

        debug!(ranges = ranges.len(), entries = entries.len(), "opened scan");
        self.inner.open_scans.fetch_add(1, Ordering::SeqCst);
        Ok(MemScan {
            entries: entries.into_iter(),
            inner: Arc::clone(&self.inner),
            closed: false,
        })
    }
}

/// Edge rows carry a direction flag as their last field; entity rows
/// have no flag and pass every filter.
fn direction_allows(key: &Key, in_out: InOutType, layout: &ByteLayout) -> bool {
    let Some(flag) = row_flag(key, layout) else {
        return true;
    };
    match in_out {
        InOutType::Either => true,
        // An IncorrectWay row is anchored at the edge's destination, so
        // from the anchor's point of view the edge is incoming.
        InOutType::Outgoing => flag != DirectionFlag::IncorrectWay,
        InOutType::Incoming => flag != DirectionFlag::CorrectWay,
    }
}

fn row_flag(key: &Key, layout: &ByteLayout) -> Option<DirectionFlag> {
    let d = layout.delimiter();
    let fields: Vec<&[u8]> = key.row.split(|&b| b == d).collect();
    match fields.as_slice() {
        [_, _, flag] if flag.len() == 1 => DirectionFlag::from_byte(flag[0], layout),
        _ => None,
    }
}

/// Fold runs of same-cell entries into one entry each.
///
/// Entries arrive in key order, so versions of a cell are adjacent and
/// ascending by timestamp. Declared aggregate functions merge property
/// values; undeclared properties take the newest version. The surviving
/// key is the newest one.
fn aggregate_same_cells(
    entries: Vec<(Key, Value)>,
    schema: &Schema,
    layout: &ByteLayout,
) -> Result<Vec<(Key, Value)>> {
    let mut out: Vec<(Key, Value)> = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        match out.last_mut() {
            Some((last_key, last_value)) if last_key.same_cell(&key) => {
                let merged = merge_values(last_key, last_value, &value, schema, layout)?;
                *last_key = key;
                *last_value = merged;
            }
            _ => out.push((key, value)),
        }
    }
    Ok(out)
}

fn merge_values(
    key: &Key,
    older: &[u8],
    newer: &[u8],
    schema: &Schema,
    layout: &ByteLayout,
) -> Result<Value> {
    let group_bytes = layout.unescape(&key.column_family)?;
    let group = String::from_utf8(group_bytes)
        .map_err(|e| Error::conversion(format!("group name is not utf-8: {}", e)))?;
    let group_schema = schema
        .group(&group)
        .ok_or_else(|| Error::conversion(format!("unknown group {:?}", group)))?;

    let mut bag: Properties = bincode::deserialize(older)
        .map_err(|e| Error::conversion(format!("value decode: {}", e)))?;
    let newer_bag: Properties = bincode::deserialize(newer)
        .map_err(|e| Error::conversion(format!("value decode: {}", e)))?;

    for (name, new_value) in newer_bag {
        let aggregate = group_schema.def(&name).and_then(|d| d.aggregate);
        match (bag.get(&name), aggregate) {
            (Some(old_value), Some(f)) => {
                let merged = f.merge(old_value, &new_value)?;
                bag.insert(name, merged);
            }
            _ => {
                bag.insert(name, new_value);
            }
        }
    }
    bincode::serialize(&bag).map_err(|e| Error::serialisation(format!("value encode: {}", e)))
}

/// A materialised scan over the memory store.
pub struct MemScan {
    entries: std::vec::IntoIter<(Key, Value)>,
    inner: Arc<Inner>,
    closed: bool,
}

impl std::fmt::Debug for MemScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemScan")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Iterator for MemScan {
    type Item = (Key, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        self.entries.next()
    }
}

impl ScanIter for MemScan {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.open_scans.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemScan {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ElementCodec;
    use crate::element::{Edge, Element, Entity};
    use crate::schema::{AggregateFunction, GroupSchema, PropertyDef, SerialiserKind};
    use crate::view::View;

    fn schema() -> Schema {
        Schema::new(SerialiserKind::Utf8)
            .with_group(
                "Person",
                GroupSchema::new(vec![PropertyDef::plain("age", SerialiserKind::I64Be)]),
            )
            .with_group(
                "Knows",
                GroupSchema::new(vec![PropertyDef::aggregated(
                    "weight",
                    SerialiserKind::I64Be,
                    AggregateFunction::Sum,
                )]),
            )
    }

    fn options_for(view: View, schema: &Schema) -> ScanOptions {
        let config = ScanPredicateConfig::new(view, schema.clone(), ByteLayout::DEFAULT);
        ScanOptions::unfiltered().with_predicate(config.to_options().unwrap())
    }

    fn everything() -> Range {
        Range::half_open(Key::from_row(vec![]), Key::from_row(vec![0xFF; 8]))
    }

    #[test]
    fn test_put_and_scan_sorted() {
        let store = MemStore::new();
        store.put(Key::new(vec![2], vec![], vec![]), vec![]);
        store.put(Key::new(vec![1], vec![], vec![]), vec![]);
        store.put(Key::new(vec![3], vec![], vec![]), vec![]);

        let scan = store
            .open_scan(&[everything()], &ScanOptions::unfiltered())
            .unwrap();
        let rows: Vec<Vec<u8>> = scan.map(|(k, _)| k.row).collect();
        assert_eq!(rows, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_overlapping_ranges_deduplicate() {
        let store = MemStore::new();
        store.put(Key::new(vec![1], vec![], vec![]), vec![]);
        let ranges = [everything(), everything()];
        let scan = store
            .open_scan(&ranges, &ScanOptions::unfiltered())
            .unwrap();
        assert_eq!(scan.count(), 1);
    }

    #[test]
    fn test_predicate_filters_groups() {
        let schema = schema();
        let codec = ElementCodec::new(ByteLayout::DEFAULT);
        let store = MemStore::new();
        let person: Element = Entity::new("Person", "alice").into();
        let knows: Element = Edge::new("Knows", "alice", "bob", true).into();
        store.put_pairs(codec.to_key_values(&person, &schema).unwrap());
        store.put_pairs(codec.to_key_values(&knows, &schema).unwrap());

        let options = options_for(View::of_groups(["Person"]), &schema);
        let scan = store.open_scan(&[everything()], &options).unwrap();
        assert_eq!(scan.count(), 1);
    }

    #[test]
    fn test_direction_filter() {
        let schema = schema();
        let codec = ElementCodec::new(ByteLayout::DEFAULT);
        let store = MemStore::new();
        let edge: Element = Edge::new("Knows", "a", "b", true).into();
        store.put_pairs(codec.to_key_values(&edge, &schema).unwrap());

        let base = options_for(View::of_groups(["Knows"]), &schema);

        let both = store.open_scan(&[everything()], &base).unwrap();
        assert_eq!(both.count(), 2);

        // Outgoing keeps the source-first row only; incoming the twin.
        let outgoing = store
            .open_scan(&[everything()], &base.clone().with_in_out(InOutType::Outgoing))
            .unwrap();
        assert_eq!(outgoing.count(), 1);
        let incoming = store
            .open_scan(&[everything()], &base.with_in_out(InOutType::Incoming))
            .unwrap();
        assert_eq!(incoming.count(), 1);
    }

    #[test]
    fn test_same_cell_aggregation() {
        let schema = schema();
        let codec = ElementCodec::new(ByteLayout::DEFAULT);
        let store = MemStore::new();
        for weight in [2i64, 3, 5] {
            let edge: Element = Edge::new("Knows", "a", "b", true)
                .with_property("weight", weight)
                .into();
            store.put_pairs(codec.to_key_values(&edge, &schema).unwrap());
        }
        assert_eq!(store.len(), 6);

        let options = options_for(View::of_groups(["Knows"]), &schema)
            .with_in_out(InOutType::Outgoing)
            .with_aggregate(true);
        let scan = store.open_scan(&[everything()], &options).unwrap();
        let entries: Vec<_> = scan.collect();
        assert_eq!(entries.len(), 1);

        let element = codec
            .to_element(&entries[0].0, &entries[0].1, &schema, false)
            .unwrap();
        let Element::Edge(edge) = element else { panic!("expected edge") };
        assert_eq!(
            edge.properties.get("weight"),
            Some(&crate::element::PropertyValue::Long(10))
        );
    }

    #[test]
    fn test_open_scan_count_tracks_close_and_drop() {
        let store = MemStore::new();
        store.put(Key::new(vec![1], vec![], vec![]), vec![]);

        let mut scan = store
            .open_scan(&[everything()], &ScanOptions::unfiltered())
            .unwrap();
        assert_eq!(store.open_scan_count(), 1);
        scan.close();
        scan.close();
        assert_eq!(store.open_scan_count(), 0);

        let scan = store
            .open_scan(&[everything()], &ScanOptions::unfiltered())
            .unwrap();
        assert_eq!(store.open_scan_count(), 1);
        drop(scan);
        assert_eq!(store.open_scan_count(), 0);
    }

    #[test]
    fn test_unavailable_store_refuses_scans() {
        let store = MemStore::new();
        store.set_unavailable(true);
        let err = store
            .open_scan(&[everything()], &ScanOptions::unfiltered())
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));

        store.set_unavailable(false);
        assert!(store.open_scan(&[everything()], &ScanOptions::unfiltered()).is_ok());
    }

    #[test]
    fn test_bad_predicate_options_fail_at_open() {
        let store = MemStore::new();
        let mut options = BTreeMap::new();
        options.insert(crate::predicate::VIEW_OPTION.to_string(), "{}".to_string());
        let err = store
            .open_scan(
                &[everything()],
                &ScanOptions::unfiltered().with_predicate(options),
            )
            .unwrap_err();
        assert!(matches!(err, Error::PredicateConfig(_)));
        assert_eq!(store.open_scan_count(), 0);
    }
}
