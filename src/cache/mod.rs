//! Content cache: fingerprint-keyed parse results shared across a run and,
//! with a durable store, across runs.
//!
//! # Lookup
//!
//! ```text
//! memory map ──hit──▶ record
//!     │ miss
//!     ▼
//! durable store ──hit──▶ promote to memory ─▶ record
//!     │ miss
//!     ▼
//! in-flight cell ─▶ parse ─▶ re-stat ─▶ memory + durable write-through
//! ```
//!
//! A cached entry is valid only while `(path, size, mtime_ns)` matches the
//! live file and, with `verify_content_hash`, the SHA-256 of its bytes also
//! matches. Files above the size ceiling are never read, so for them the
//! stat match alone decides. Failed parses are cached like successes.
//!
//! Concurrent requests for the same key share one `OnceCell`, so a file is
//! parsed at most once per key. If the file changes while it is being
//! parsed the result is discarded and the file parsed again; such races are
//! counted but never surfaced.

pub mod sqlite;
pub mod store;

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;

use crate::config::CacheConfig;
use crate::discovery::{live_fingerprint, Candidate};
use crate::error::CacheStoreError;
use crate::models::{ArtifactRecord, CacheEntry, Fingerprint};
use crate::parsers::content_hash;

pub use sqlite::SqliteCacheStore;
pub use store::{CacheStore, MemoryCacheStore, StoreSummary};

/// Parse attempts per resolve before a still-changing file is returned
/// uncached.
const MAX_PARSE_ATTEMPTS: usize = 3;

type StatKey = (String, u64, i64);
type InflightCell = Arc<OnceCell<(Arc<ArtifactRecord>, bool)>>;

/// Result of [`ContentCache::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub record: Arc<ArtifactRecord>,
    /// Served without parsing in this call.
    pub hit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub races: u64,
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ContentCache {
    memory: RwLock<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<StatKey, InflightCell>>,
    store: Option<Arc<dyn CacheStore>>,
    store_degraded: AtomicBool,
    verify_content_hash: bool,
    max_file_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    races: AtomicU64,
}

impl ContentCache {
    pub fn new(verify_content_hash: bool, store: Option<Arc<dyn CacheStore>>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            store,
            store_degraded: AtomicBool::new(false),
            verify_content_hash,
            max_file_bytes: u64::MAX,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            races: AtomicU64::new(0),
        }
    }

    /// Files larger than `bytes` are treated as oversized: they are never
    /// hashed, and a re-parse after a race keeps them flagged.
    pub fn with_size_ceiling(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    /// In-run cache only.
    pub fn in_memory(verify_content_hash: bool) -> Self {
        Self::new(verify_content_hash, None)
    }

    /// Build the cache described by `[cache]`. A durable store that cannot
    /// be opened degrades to an in-memory cache with a warning.
    pub async fn from_config(config: &CacheConfig) -> Self {
        let store: Option<Arc<dyn CacheStore>> = match &config.path {
            Some(path) => match SqliteCacheStore::open(path).await {
                Ok(s) => Some(Arc::new(s)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "durable cache unavailable; using in-memory cache");
                    None
                }
            },
            None => None,
        };
        Self::new(config.verify_content_hash, store)
    }

    pub fn has_durable_store(&self) -> bool {
        self.store.is_some() && !self.store_degraded.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            races: self.races.load(Ordering::Relaxed),
            entries: self.memory.read().map(|m| m.len() as u64).unwrap_or(0),
        }
    }

    /// Evict every in-memory and durable entry. Returns the number of
    /// durable entries removed.
    pub async fn clear(&self) -> Result<u64, CacheStoreError> {
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        match &self.store {
            Some(store) => store.clear().await,
            None => Ok(0),
        }
    }

    /// Durable store summary, if a store is configured.
    pub async fn summary(&self) -> Result<Option<StoreSummary>, CacheStoreError> {
        match &self.store {
            Some(store) => store.summary().await.map(Some),
            None => Ok(None),
        }
    }

    /// Return the record for `candidate`, parsing with `parse` only when no
    /// valid entry exists.
    pub async fn resolve<F, Fut>(&self, candidate: &Candidate, parse: F) -> Resolved
    where
        F: Fn(Candidate) -> Fut,
        Fut: Future<Output = ArtifactRecord>,
    {
        let key = candidate.fingerprint();

        if let Some(record) = self.lookup_memory(candidate, &key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(path = %key.path, "cache hit (memory)");
            return Resolved { record, hit: true };
        }

        if let Some(record) = self.lookup_store(candidate, &key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(path = %key.path, "cache hit (durable)");
            return Resolved { record, hit: true };
        }

        let cell = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            inflight
                .entry(key.stat_key())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let initializer = AtomicBool::new(false);
        let (record, cacheable) = cell
            .get_or_init(|| async {
                initializer.store(true, Ordering::Relaxed);
                self.parse_fresh(candidate, &parse).await
            })
            .await
            .clone();
        let parsed_here = initializer.load(Ordering::Relaxed);

        if parsed_here {
            self.misses.fetch_add(1, Ordering::Relaxed);
            if cacheable {
                self.insert(&record).await;
            }
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if inflight
                .get(&key.stat_key())
                .map(|c| Arc::ptr_eq(c, &cell))
                .unwrap_or(false)
            {
                inflight.remove(&key.stat_key());
            }
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        Resolved {
            record,
            hit: !parsed_here,
        }
    }

    fn lookup_memory(&self, candidate: &Candidate, key: &Fingerprint) -> Option<Arc<ArtifactRecord>> {
        let entry = {
            let memory = self.memory.read().unwrap_or_else(|e| e.into_inner());
            memory.get(&key.path).cloned()?
        };
        self.validate(candidate, key, &entry)
            .then(|| entry.record.clone())
    }

    async fn lookup_store(&self, candidate: &Candidate, key: &Fingerprint) -> Option<Arc<ArtifactRecord>> {
        let store = self.active_store()?;
        let entry = match store.get(&key.path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                self.degrade(&e);
                return None;
            }
        };
        if !self.validate(candidate, key, &entry) {
            return None;
        }
        let record = entry.record.clone();
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.path.clone(), entry);
        Some(record)
    }

    fn validate(&self, candidate: &Candidate, key: &Fingerprint, entry: &CacheEntry) -> bool {
        if !entry.fingerprint.same_stat(key) {
            return false;
        }
        if !self.verify_content_hash || self.is_oversized(candidate) {
            return true;
        }
        let live = hash_file(&candidate.path, self.max_file_bytes);
        match (&entry.fingerprint.content_hash, live) {
            (Some(cached), Some(live)) => *cached == live,
            _ => false,
        }
    }

    fn is_oversized(&self, candidate: &Candidate) -> bool {
        candidate.oversized || candidate.size > self.max_file_bytes
    }

    async fn parse_fresh<F, Fut>(&self, candidate: &Candidate, parse: &F) -> (Arc<ArtifactRecord>, bool)
    where
        F: Fn(Candidate) -> Fut,
        Fut: Future<Output = ArtifactRecord>,
    {
        let mut current = candidate.clone();
        let mut attempt = 1;
        loop {
            let record = parse(current.clone()).await;
            let after = match live_fingerprint(&current) {
                Ok(fp) => fp,
                // Vanished or unreadable: the record already describes that.
                Err(_) => return (Arc::new(record), true),
            };
            if after.same_stat(&record.fingerprint) {
                return (Arc::new(record), true);
            }

            self.races.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(path = %current.rel_path, attempt, "file changed during parse; re-parsing");
            if attempt >= MAX_PARSE_ATTEMPTS {
                return (Arc::new(record), false);
            }
            current.size = after.size;
            current.mtime_ns = after.mtime_ns;
            current.oversized = after.size > self.max_file_bytes;
            attempt += 1;
        }
    }

    async fn insert(&self, record: &Arc<ArtifactRecord>) {
        let entry = CacheEntry {
            fingerprint: record.fingerprint.clone(),
            record: record.clone(),
            cached_at: Utc::now(),
        };
        if let Some(store) = self.active_store() {
            if let Err(e) = store.put(&entry).await {
                self.degrade(&e);
            }
        }
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.path.clone(), entry);
    }

    fn active_store(&self) -> Option<&Arc<dyn CacheStore>> {
        if self.store_degraded.load(Ordering::Relaxed) {
            return None;
        }
        self.store.as_ref()
    }

    fn degrade(&self, error: &CacheStoreError) {
        if !self.store_degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(error = %error, "durable cache failed; continuing with in-memory cache only");
        }
    }
}

/// SHA-256 of the file, or `None` if it cannot be read or has grown past
/// `limit` bytes.
fn hash_file(path: &Path, limit: u64) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .ok()?;
    if bytes.len() as u64 > limit {
        return None;
    }
    Some(content_hash(&bytes))
}
