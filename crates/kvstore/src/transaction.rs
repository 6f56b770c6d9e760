use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rocksdb::{Direction, IteratorMode, WriteBatch};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::codec;
use crate::store::{marker_key, row_key, row_prefix, StoreInner};
use crate::Error;

/// A single store transaction.
///
/// Writable transactions stage mutations in an ordered overlay and flush
/// them in one atomic write batch on [`commit`](Self::commit). Reads inside
/// the transaction observe staged writes. Dropping the transaction without
/// committing discards the overlay.
pub struct Transaction {
    inner: Arc<StoreInner>,
    writable: bool,
    overlay: BTreeMap<Vec<u8>, Vec<u8>>,
    created_buckets: BTreeSet<Vec<u8>>,
    failed: Option<String>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl Transaction {
    pub(crate) fn new(
        inner: Arc<StoreInner>,
        writable: bool,
        guard: Option<OwnedMutexGuard<()>>,
    ) -> Self {
        Self {
            inner,
            writable,
            overlay: BTreeMap::new(),
            created_buckets: BTreeSet::new(),
            failed: None,
            _guard: guard,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool, Error> {
        let marker = marker_key(bucket);
        if self.created_buckets.contains(&marker) {
            return Ok(true);
        }

        Ok(self.inner.db.get_pinned(&marker)?.is_some())
    }

    /// Fetches and decodes the value at `bucket`/`key`.
    pub fn get<T>(&self, bucket: &str, key: impl AsRef<[u8]>) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        if !self.bucket_exists(bucket)? {
            return Err(Error::BucketNotFound(bucket.to_owned()));
        }

        let row = row_key(bucket, key.as_ref());
        if let Some(value) = self.overlay.get(&row) {
            return codec::decode(value);
        }

        match self.inner.db.get_pinned(&row)? {
            Some(value) => codec::decode(&value),
            None => Err(Error::KeyNotFound),
        }
    }

    /// Encodes and stages `value` at `bucket`/`key`, creating the bucket if
    /// needed. Any failure here poisons the transaction: the subsequent
    /// commit fails.
    pub fn set<T>(&mut self, bucket: &str, key: impl AsRef<[u8]>, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        if !self.writable {
            return Err(Error::ReadOnly);
        }

        let staged = self.try_set(bucket, key.as_ref(), value);
        if let Err(err) = &staged {
            self.failed = Some(err.to_string());
        }

        staged
    }

    fn try_set<T>(&mut self, bucket: &str, key: &[u8], value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode(value)?;

        if !self.bucket_exists(bucket)? {
            let _ = self.created_buckets.insert(marker_key(bucket));
        }
        let _ = self.overlay.insert(row_key(bucket, key), encoded);

        Ok(())
    }

    /// Visits every key/value pair in `bucket` in key order. The visitor's
    /// error aborts the iteration and is returned as-is.
    pub fn for_each<F>(&self, bucket: &str, mut visitor: F) -> Result<(), Error>
    where
        F: FnMut(&[u8], &[u8]) -> Result<(), Error>,
    {
        if !self.bucket_exists(bucket)? {
            return Err(Error::BucketNotFound(bucket.to_owned()));
        }

        let prefix = row_prefix(bucket);
        let mut rows: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        let iter = self
            .inner
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let _ = rows.insert(key[prefix.len()..].to_vec(), value.into_vec());
        }

        // Staged writes shadow persisted rows.
        for (key, value) in self.overlay.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let _ = rows.insert(key[prefix.len()..].to_vec(), value.clone());
        }

        for (key, value) in &rows {
            visitor(key, value)?;
        }

        Ok(())
    }

    /// Atomically persists every staged write. Committing a read-only
    /// transaction is equivalent to rolling it back.
    pub fn commit(self) -> Result<(), Error> {
        if !self.writable {
            return Ok(());
        }
        if let Some(reason) = self.failed {
            return Err(Error::Failed(reason));
        }

        let mut batch = WriteBatch::default();
        for marker in &self.created_buckets {
            batch.put(marker, b"");
        }
        for (key, value) in &self.overlay {
            batch.put(key, value);
        }

        self.inner.db.write(batch)?;

        Ok(())
    }

    /// Discards every staged write and releases the writer slot.
    pub fn rollback(self) {
        drop(self);
    }
}
