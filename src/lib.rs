// Jala v0.1.0 - Property Graphs over Sorted Key/Value Stores

pub mod codec;
pub mod element;
pub mod error;
pub mod escape;
pub mod key;
pub mod predicate;
pub mod ranges;
pub mod retriever;
pub mod schema;
pub mod store;
pub mod view;

// Re-export main types
pub use codec::ElementCodec;
pub use element::{
    DirectedType, Edge, Element, Entity, InOutType, MatchedVertex, Properties, PropertyValue,
};
pub use error::{Error, Result};
pub use escape::ByteLayout;
pub use key::{Key, Range, Value};
pub use predicate::{ScanPredicate, ScanPredicateConfig};
pub use ranges::{QueryOptions, RangeFactory, Seed, SeedMatching};
pub use retriever::{ElementIterator, Retriever, RetrieverConfig};
pub use schema::{AggregateFunction, GroupSchema, PropertyDef, Schema, SerialiserKind};
pub use store::{memory::MemStore, ScanIter, ScanOptions, Store};
pub use view::{PredicateOp, PropertyPredicate, View, ViewGroup};
