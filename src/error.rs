//! Error types for jala

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
///
/// Each variant corresponds to one failure class with its own propagation
/// rule: the retriever skips-and-continues on `ElementConversion` and
/// `RangeFactory`, and fails closed on everything else.
#[derive(Error, Debug)]
pub enum Error {
    /// A serialiser was asked to handle a value of the wrong runtime type
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// A stored (Key, Value) pair could not be decoded back into an element
    #[error("element conversion error: {0}")]
    ElementConversion(String),

    /// A seed could not be converted into a scan range
    #[error("range factory error: {0}")]
    RangeFactory(String),

    /// Missing or invalid scan predicate configuration
    #[error("scan predicate config error: {0}")]
    PredicateConfig(String),

    /// The underlying store could not open a scan
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl Error {
    /// Create a serialisation error
    pub fn serialisation(msg: impl Into<String>) -> Self {
        Error::Serialisation(msg.into())
    }

    /// Create an element conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        Error::ElementConversion(msg.into())
    }

    /// Create a range factory error
    pub fn range_factory(msg: impl Into<String>) -> Self {
        Error::RangeFactory(msg.into())
    }

    /// Create a predicate configuration error
    pub fn predicate_config(msg: impl Into<String>) -> Self {
        Error::PredicateConfig(msg.into())
    }

    /// Create a store unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Error::StoreUnavailable(msg.into())
    }
}
