//! Durable backing store abstraction for the content cache.
//!
//! The [`CacheStore`] trait lets the cache persist entries across runs.
//! [`SqliteCacheStore`](super::sqlite::SqliteCacheStore) is the production
//! backend; [`MemoryCacheStore`] backs tests.
//!
//! Entries are keyed by artifact path. Staleness is decided by the cache
//! against the entry's fingerprint, so a store only ever holds the latest
//! record for a path.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::CacheStoreError;
use crate::models::CacheEntry;

/// Entry counts for `arx cache stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub entries: u64,
    pub by_format: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    /// Size of the backing file, when there is one.
    pub bytes_on_disk: Option<u64>,
}

/// Abstract durable store for cache entries.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](CacheStore::get) | Latest entry for a path |
/// | [`put`](CacheStore::put) | Insert or replace the entry for a path |
/// | [`clear`](CacheStore::clear) | Remove every entry |
/// | [`summary`](CacheStore::summary) | Counts by format and status |
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<CacheEntry>, CacheStoreError>;

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheStoreError>;

    /// Returns the number of entries removed.
    async fn clear(&self) -> Result<u64, CacheStoreError>;

    async fn summary(&self) -> Result<StoreSummary, CacheStoreError>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, path: &str) -> Result<Option<CacheEntry>, CacheStoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(path).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheStoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(entry.fingerprint.path.clone(), entry.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<u64, CacheStoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn summary(&self) -> Result<StoreSummary, CacheStoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut summary = StoreSummary {
            entries: entries.len() as u64,
            ..Default::default()
        };
        for entry in entries.values() {
            *summary
                .by_format
                .entry(entry.record.format.as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .by_status
                .entry(entry.record.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(summary)
    }
}
