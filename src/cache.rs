//! # Cache Collaborator Module
//!
//! The pluggable cache seam the request engine talks to for conditional
//! fetches: stored validators (`ETag`, `Last-Modified`) become
//! `If-None-Match` / `If-Modified-Since` request headers, and a 304 terminal
//! hands the stored object back to the caller via `NotModified`.
//!
//! The engine only needs the trait; `MemoryCache` is the in-process default
//! used by tests and small crawls. On-disk layouts are a caller concern.

use async_trait::async_trait;
use bytes::Bytes;

use crate::events::{CacheObject, ResponseHead};
use crate::item::QueueItem;

/// Cache collaborator contract.
#[async_trait]
pub trait Cache: Send + Sync {
    /// The stored object for an item, if any.
    async fn get_cache_data(&self, item: &QueueItem) -> Option<CacheObject>;

    /// Stores a freshly downloaded response.
    async fn set_cache_data(&self, item: &QueueItem, head: &ResponseHead, body: &[u8]);

    /// Flushes pending writes, when the backend has such a notion.
    async fn save_cache(&self);
}

/// In-memory cache over a bounded `moka` store.
pub struct MemoryCache {
    store: moka::sync::Cache<String, CacheObject>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        MemoryCache {
            store: moka::sync::Cache::new(max_entries),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::new(10_000)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_cache_data(&self, item: &QueueItem) -> Option<CacheObject> {
        self.store.get(&item.url)
    }

    async fn set_cache_data(&self, item: &QueueItem, head: &ResponseHead, body: &[u8]) {
        let object = CacheObject {
            etag: head.headers.get("etag").cloned(),
            last_modified: head.headers.get("last-modified").cloned(),
            body: Some(Bytes::copy_from_slice(body)),
        };
        self.store.insert(item.url.clone(), object);
    }

    async fn save_cache(&self) {}
}
