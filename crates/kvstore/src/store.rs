use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use rocksdb::{Options, DB};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::transaction::Transaction;
use crate::Error;

pub(crate) struct StoreInner {
    pub(crate) db: DB,
    pub(crate) write_lock: Arc<Mutex<()>>,
}

// Bucket markers and data rows live in disjoint keyspaces. A marker row is
// written when a bucket is first set into, which is what makes the
// BucketNotFound / KeyNotFound distinction observable.
pub(crate) fn marker_key(bucket: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(bucket.len() + 2);
    key.extend_from_slice(b"b:");
    key.extend_from_slice(bucket.as_bytes());
    key
}

pub(crate) fn row_prefix(bucket: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(bucket.len() + 3);
    prefix.extend_from_slice(b"r:");
    prefix.extend_from_slice(bucket.as_bytes());
    prefix.push(0);
    prefix
}

pub(crate) fn row_key(bucket: &str, key: &[u8]) -> Vec<u8> {
    let mut row = row_prefix(bucket);
    row.extend_from_slice(key);
    row
}

/// A key/value store with transaction capabilities.
///
/// Multiple read-only transactions may run concurrently, but only one
/// writable transaction is allowed at any given time; [`Store::begin_tx`]
/// blocks until the in-flight writer finishes.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Opens the store backed by a database at `path`, creating it if
    /// missing. Reopening recovers the last committed state.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut options = Options::default();
        options.create_if_missing(true);

        let db = DB::open(&options, path.as_ref())?;
        info!(path = %path.as_ref().display(), "opened key/value store");

        Ok(Self {
            inner: Arc::new(StoreInner {
                db,
                write_lock: Arc::new(Mutex::new(())),
            }),
        })
    }

    /// Begins a transaction. The caller is responsible for closing it out
    /// with [`Transaction::commit`] or [`Transaction::rollback`]; a dropped
    /// transaction rolls back.
    pub async fn begin_tx(&self, writable: bool) -> Result<Transaction, Error> {
        let guard = if writable {
            debug!("waiting for writable transaction slot");
            Some(Arc::clone(&self.inner.write_lock).lock_owned().await)
        } else {
            None
        };

        Ok(Transaction::new(Arc::clone(&self.inner), writable, guard))
    }

    /// Runs `f` inside a transaction: commits on success, rolls back on
    /// error. A panic inside `f` is converted into rollback plus
    /// [`Error::Panic`].
    pub async fn run_transaction<F>(&self, writable: bool, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Transaction) -> Result<(), Error>,
    {
        let mut tx = self.begin_tx(writable).await?;

        match catch_unwind(AssertUnwindSafe(|| f(&mut tx))) {
            Ok(Ok(())) => tx.commit(),
            Ok(Err(err)) => {
                tx.rollback();
                Err(err)
            }
            Err(panic) => {
                tx.rollback();
                Err(Error::Panic(panic_message(&panic)))
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
