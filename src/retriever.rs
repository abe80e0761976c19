//! Lazy Batched Retriever
//!
//! Drives a query end to end: seeds are consumed in batches, each batch
//! becomes one store scan via the range factory, and scan entries decode
//! back into elements as the caller pulls them. Nothing is read from the
//! seed source or the store until the iterator is polled.
//!
//! A retriever holds at most one live scan, in a shared slot guarded by
//! an epoch counter. Starting a new query closes whatever scan the slot
//! holds, and a superseded iterator sees the epoch change and ends
//! instead of touching the newer query's scan.
//!
//! Failure policy: a seed that cannot produce ranges, or an entry that
//! cannot be decoded, is logged and skipped so one bad input does not
//! sink the query. A store that cannot open a scan at all ends the
//! retrieval; partial silence about an unavailable backend would look
//! like an empty result.

use crate::codec::ElementCodec;
use crate::element::Element;
use crate::error::Result;
use crate::escape::ByteLayout;
use crate::key::Range;
use crate::predicate::ScanPredicateConfig;
use crate::ranges::{QueryOptions, RangeFactory, Seed};
use crate::schema::Schema;
use crate::store::{ScanIter, ScanOptions, Store};
use crate::view::View;
use parking_lot::Mutex;
use tracing::{error, warn};

/// Retriever tuning knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrieverConfig {
    /// Seeds per store scan.
    pub max_batch_size: usize,
    /// Decode which endpoint each edge row was keyed by.
    pub include_matched_vertex: bool,
    /// Ask the store to merge same-cell entries at scan time.
    pub aggregate: bool,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            include_matched_vertex: false,
            aggregate: true,
        }
    }
}

/// The one-live-scan slot. The epoch names which query owns the scan.
struct ScanSlot<T> {
    scan: Option<T>,
    epoch: u64,
}

impl<T> Default for ScanSlot<T> {
    fn default() -> Self {
        Self {
            scan: None,
            epoch: 0,
        }
    }
}

/// A configured query runner over one store.
pub struct Retriever<S: Store> {
    store: S,
    schema: Schema,
    view: View,
    layout: ByteLayout,
    options: QueryOptions,
    config: RetrieverConfig,
    slot: Mutex<ScanSlot<S::Scan>>,
}

impl<S: Store> Retriever<S> {
    pub fn new(store: S, schema: Schema, view: View) -> Self {
        Self {
            store,
            schema,
            view,
            layout: ByteLayout::DEFAULT,
            options: QueryOptions::default(),
            config: RetrieverConfig::default(),
            slot: Mutex::new(ScanSlot::default()),
        }
    }

    pub fn with_layout(mut self, layout: ByteLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_query_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_config(mut self, config: RetrieverConfig) -> Self {
        self.config = config;
        self
    }

    /// Start a lazy retrieval over `seeds`.
    ///
    /// Any scan still open from an earlier query on this retriever is
    /// closed here; that query's iterator is superseded and yields
    /// nothing further. Only predicate-config serialisation can fail at
    /// this point; everything touching the store happens as the returned
    /// iterator is polled.
    pub fn query<I>(&self, seeds: I) -> Result<ElementIterator<'_, S, I::IntoIter>>
    where
        I: IntoIterator<Item = Seed>,
    {
        let predicate =
            ScanPredicateConfig::new(self.view.clone(), self.schema.clone(), self.layout)
                .to_options()?;
        let scan_options = ScanOptions {
            predicate: Some(predicate),
            in_out: self.options.in_out,
            aggregate: self.config.aggregate,
        };

        let epoch = {
            let mut slot = self.slot.lock();
            if let Some(mut scan) = slot.scan.take() {
                scan.close();
            }
            slot.epoch += 1;
            slot.epoch
        };

        Ok(ElementIterator {
            retriever: self,
            factory: RangeFactory::new(self.layout),
            codec: ElementCodec::new(self.layout),
            scan_options,
            seeds: seeds.into_iter(),
            epoch,
            done: false,
        })
    }
}

/// The pull side of a retrieval. The live scan sits in the retriever's
/// shared slot; it is closed when its batch is exhausted, when a newer
/// query takes the slot, when [`close`](Self::close) is called, or on
/// drop.
pub struct ElementIterator<'r, S: Store, I: Iterator<Item = Seed>> {
    retriever: &'r Retriever<S>,
    factory: RangeFactory,
    codec: ElementCodec,
    scan_options: ScanOptions,
    seeds: I,
    epoch: u64,
    done: bool,
}

impl<S: Store, I: Iterator<Item = Seed>> ElementIterator<'_, S, I> {
    /// End the retrieval early, releasing the live scan if it is still
    /// this query's. Idempotent.
    pub fn close(&mut self) {
        let mut slot = self.retriever.slot.lock();
        if slot.epoch == self.epoch {
            if let Some(mut scan) = slot.scan.take() {
                scan.close();
            }
        }
        self.done = true;
    }

    /// Ranges for the next batch of seeds. `None` when the seeds are
    /// exhausted; an empty vec when every seed in the batch was skipped.
    fn next_batch(&mut self) -> Option<Vec<Range>> {
        let batch_size = self.retriever.config.max_batch_size.max(1);
        let mut ranges = Vec::new();
        let mut consumed = 0;
        for seed in self.seeds.by_ref().take(batch_size) {
            consumed += 1;
            match self.factory.ranges_for_seed(
                &seed,
                &self.retriever.schema,
                &self.retriever.options,
            ) {
                Ok(mut seed_ranges) => ranges.append(&mut seed_ranges),
                Err(e) => warn!(error = %e, "skipping unresolvable seed"),
            }
        }
        (consumed > 0).then_some(ranges)
    }

    /// Pull decoded elements from the slot's scan until one passes the
    /// view, the batch drains, or the slot turns out not to be ours.
    fn next_from_scan(&mut self) -> ScanStep {
        let mut slot = self.retriever.slot.lock();
        if slot.epoch != self.epoch {
            return ScanStep::Superseded;
        }
        let Some(scan) = slot.scan.as_mut() else {
            return ScanStep::Drained;
        };
        for (key, value) in scan.by_ref() {
            let decoded = self.codec.to_element(
                &key,
                &value,
                &self.retriever.schema,
                self.retriever.config.include_matched_vertex,
            );
            let mut element = match decoded {
                Ok(element) => element,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable scan entry");
                    continue;
                }
            };
            if !self.retriever.view.validate_post_aggregation(&element) {
                continue;
            }
            self.retriever.view.strip_unrequested(&mut element);
            return ScanStep::Element(element);
        }
        // Batch drained.
        if let Some(mut scan) = slot.scan.take() {
            scan.close();
        }
        ScanStep::Drained
    }

    /// Park a freshly opened scan in the slot, unless a newer query has
    /// taken over in the meantime.
    fn park_scan(&mut self, mut scan: S::Scan) -> bool {
        let mut slot = self.retriever.slot.lock();
        if slot.epoch != self.epoch {
            scan.close();
            return false;
        }
        slot.scan = Some(scan);
        true
    }
}

enum ScanStep {
    Element(Element),
    Drained,
    Superseded,
}

impl<S: Store, I: Iterator<Item = Seed>> Iterator for ElementIterator<'_, S, I> {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        loop {
            if self.done {
                return None;
            }

            match self.next_from_scan() {
                ScanStep::Element(element) => return Some(element),
                ScanStep::Superseded => {
                    self.done = true;
                    return None;
                }
                ScanStep::Drained => {}
            }

            let Some(ranges) = self.next_batch() else {
                self.done = true;
                return None;
            };
            if ranges.is_empty() {
                continue;
            }
            match self.retriever.store.open_scan(&ranges, &self.scan_options) {
                Ok(scan) => {
                    if !self.park_scan(scan) {
                        self.done = true;
                        return None;
                    }
                }
                Err(e) => {
                    error!(error = %e, "store refused scan, ending retrieval");
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

impl<S: Store, I: Iterator<Item = Seed>> Drop for ElementIterator<'_, S, I> {
    fn drop(&mut self) {
        self.close();
    }
}
