//! Blob table: routes keys to buckets.
//!
//! The table is a fixed array of buckets; a key always lands in
//! `bucket_index(key, bucket_count)`. There is no cross-bucket lock: each
//! bucket carries its own mutex, held only for the span of one operation.
//! A rename whose source and destination hash to different buckets takes
//! both bucket mutexes in ascending index order, which is deadlock-free.

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{CacheError, Result};
use crate::store::bucket::Bucket;
use crate::store::hash::bucket_index;

/// An entry displaced by an overflowing insert.
pub type Evicted = (String, Bytes);

/// Hash-routed collection of LRU buckets. All methods are `&self`; the
/// per-bucket mutexes serialize mutation.
pub struct BlobTable {
    buckets: Vec<Mutex<Bucket>>,
}

impl BlobTable {
    /// Create a table of `bucket_count` buckets, each holding at most
    /// `max_per_bucket` entries.
    #[must_use]
    pub fn new(bucket_count: usize, max_per_bucket: usize) -> Self {
        assert!(bucket_count > 0, "table needs at least one bucket");
        let buckets = (0..bucket_count)
            .map(|_| Mutex::new(Bucket::new(max_per_bucket)))
            .collect();
        Self { buckets }
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of live entries across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.lock().is_empty())
    }

    /// Look up `key`, promoting it on hit.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.bucket_for(key).lock().get(key)
    }

    /// Insert or overwrite `key`. Returns the evicted entry, if the insert
    /// pushed the bucket over capacity.
    pub fn upsert(&self, key: &str, blob: Bytes) -> Option<Evicted> {
        self.bucket_for(key).lock().upsert(key, blob)
    }

    /// Atomically move `old_key` to `new_key` and overwrite the contents
    /// with `blob`. When `old_key` is absent the blob is inserted at
    /// `new_key` directly. Fails with [`CacheError::Conflict`] when both
    /// keys are present.
    ///
    /// The surviving key's bucket performs the insert; when the two keys
    /// hash to different buckets both locks are taken in ascending index
    /// order.
    pub fn upsert_rename(
        &self,
        old_key: &str,
        new_key: &str,
        blob: Bytes,
    ) -> Result<Option<Evicted>> {
        let i_old = bucket_index(old_key, self.buckets.len());
        let i_new = bucket_index(new_key, self.buckets.len());

        if i_old == i_new {
            let mut bucket = self.buckets[i_new].lock();
            if old_key != new_key && bucket.peek(old_key).is_some() {
                if bucket.peek(new_key).is_some() {
                    return Err(CacheError::Conflict);
                }
                bucket.rename(old_key, new_key)?;
            }
            return Ok(bucket.upsert(new_key, blob));
        }

        let lo = i_old.min(i_new);
        let hi = i_old.max(i_new);
        let guard_lo = self.buckets[lo].lock();
        let guard_hi = self.buckets[hi].lock();
        let (mut src, mut dst) = if i_old == lo {
            (guard_lo, guard_hi)
        } else {
            (guard_hi, guard_lo)
        };

        if src.peek(old_key).is_some() {
            if dst.peek(new_key).is_some() {
                return Err(CacheError::Conflict);
            }
            src.remove(old_key);
        }
        Ok(dst.upsert(new_key, blob))
    }

    /// Remove `key`, releasing its buffer.
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.bucket_for(key).lock().remove(key)
    }

    /// Release every buffer in every bucket.
    pub fn clear(&self) {
        for bucket in &self.buckets {
            bucket.lock().clear();
        }
    }

    /// Visit all buckets in fixed index order. Used by backing-store
    /// initializers and tests; each bucket is locked only for its visit.
    pub fn for_each_bucket(&self, mut f: impl FnMut(usize, &mut Bucket)) {
        for (idx, bucket) in self.buckets.iter().enumerate() {
            f(idx, &mut bucket.lock());
        }
    }

    fn bucket_for(&self, key: &str) -> &Mutex<Bucket> {
        &self.buckets[bucket_index(key, self.buckets.len())]
    }
}
