//! Key/value store-based persistence for identity inputs.
//!
//! Inputs that track a large amount of state between runs keep it here: a
//! file-backed ordered key/value store with named buckets and single-writer
//! transactions, plus the acknowledgement tracker and pipeline contract used
//! to gate transaction commits on event delivery.

use thiserror::Error;

mod codec;
pub mod pipeline;
pub mod store;
pub mod tracker;
mod transaction;

pub use pipeline::{acknowledge, Event, EventSink};
pub use store::Store;
pub use tracker::TxTracker;
pub use transaction::Transaction;

/// Errors surfaced by the key/value store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("key not found")]
    KeyNotFound,

    #[error("transaction is read-only")]
    ReadOnly,

    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("unable to encode value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unable to decode value: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("transaction failed: {0}")]
    Failed(String),

    #[error("transaction panicked: {0}")]
    Panic(String),
}

impl Error {
    /// True for the two lookup misses a caller typically treats as "empty
    /// state" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BucketNotFound(_) | Self::KeyNotFound)
    }
}
