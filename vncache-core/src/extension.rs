//! Backing-store capability hooks.
//!
//! A node may plug a persistent store or external memory manager in behind
//! the cache. The hooks are deliberately narrow: the store consults the
//! extension on a miss and notifies it of evictions, nothing more. The
//! default [`NullExtension`] does neither, which is the supported
//! first-cut deployment.

use async_trait::async_trait;
use bytes::Bytes;

/// Hooks invoked at the seams of the blob table.
///
/// Implementations must be cheap to call; both hooks run on the request
/// path of the connection that triggered them.
#[async_trait]
pub trait CacheExtension: Send + Sync {
    /// Called when a GET misses the in-memory table. Returning bytes
    /// repopulates the table and serves the request as a hit.
    async fn on_cache_miss(&self, key: &str) -> Option<Bytes>;

    /// Called after an entry was evicted to stay within bucket capacity.
    async fn on_entry_evicted(&self, key: &str, blob: Bytes);
}

/// No-op extension: misses stay misses, evicted buffers are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullExtension;

#[async_trait]
impl CacheExtension for NullExtension {
    async fn on_cache_miss(&self, _key: &str) -> Option<Bytes> {
        None
    }

    async fn on_entry_evicted(&self, _key: &str, _blob: Bytes) {}
}
