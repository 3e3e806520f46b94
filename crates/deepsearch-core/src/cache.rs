//! Get-or-compute caching for expensive oracle calls.
//!
//! Keys are SHA-256 digests of the full semantic input, so identical work maps
//! to the same entry regardless of when it runs. Store failures degrade to a
//! cache miss.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;
use crate::metrics::record_cache_lookup;

/// External key-value storage used by [`SummaryCache`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: String) -> Result<()>;
}

pub type DynCacheStore = Arc<dyn CacheStore>;

/// Process-local store. Entries never expire.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, String>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Deterministic key: `<namespace>:<sha256 of the JSON-encoded input>`.
pub fn cache_key<T: Serialize>(namespace: &str, input: &T) -> Result<String> {
    let encoded = serde_json::to_vec(input).map_err(anyhow::Error::from)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(format!("{namespace}:{:x}", hasher.finalize()))
}

/// Wraps a store with get-or-compute semantics and hit/miss counters.
#[derive(Clone)]
pub struct SummaryCache {
    store: DynCacheStore,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl SummaryCache {
    pub fn new(store: DynCacheStore) -> Self {
        Self {
            store,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheStore::new()))
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Return the cached value for `key`, or run `compute` and store its result.
    ///
    /// Errors from `compute` are returned and never cached.
    pub async fn get_or_compute<V, F, Fut>(&self, key: &str, compute: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<V>(&raw) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    record_cache_lookup(true);
                    debug!(%key, "cache hit");
                    return Ok(value);
                }
                Err(err) => warn!(%key, error = %err, "discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(err) => warn!(%key, error = %err, "cache read failed; recomputing"),
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        record_cache_lookup(false);
        let value = compute().await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(err) = self.store.put(key, raw).await {
                    warn!(%key, error = %err, "cache write failed");
                }
            }
            Err(err) => warn!(%key, error = %err, "value not cacheable"),
        }

        Ok(value)
    }
}
