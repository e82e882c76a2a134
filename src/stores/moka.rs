use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::time::Duration;

use crate::entry::StoredEntry;
use crate::error::CacheError;
use crate::store::Store;
use crate::utils::{build_cache_key, now_ms};

/// Configuration for MokaStore.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MokaStoreConfig {
    /// Maximum number of entries the cache can hold.
    pub max_capacity: u64,

    /// Upper bound on how long any entry lives, regardless of its own expiry.
    /// `None` leaves expiry entirely to the entry timestamps.
    pub time_to_live_ms: Option<u64>,
}

impl Default for MokaStoreConfig {
    fn default() -> Self {
        MokaStoreConfig {
            max_capacity: 10_000,
            time_to_live_ms: None,
        }
    }
}

/// High-performance concurrent in-process store using Moka.
///
/// Lock-free reads and writes with automatic size-bounded eviction. Entry
/// expiry still follows each entry's own `expires_at`, so placeholders and
/// values keep their distinct TTLs.
pub struct MokaStore {
    cache: Cache<String, StoredEntry>,
}

impl MokaStore {
    /// Create a new MokaStore with the given configuration.
    pub fn new(config: MokaStoreConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(ttl) = config.time_to_live_ms {
            builder = builder.time_to_live(Duration::from_millis(ttl));
        }

        MokaStore {
            cache: builder.build(),
        }
    }

    /// Get cache statistics (for monitoring/debugging).
    pub fn stats(&self) -> (u64, u64) {
        (self.cache.entry_count(), self.cache.weighted_size())
    }
}

#[async_trait]
impl Store for MokaStore {
    fn name(&self) -> &'static str {
        "moka"
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let cache_key = build_cache_key(namespace, key);

        match self.cache.get(&cache_key).await {
            Some(entry) if entry.is_expired(now_ms()) => {
                self.cache.invalidate(&cache_key).await;
                Ok(None)
            }
            Some(entry) => Ok(Some(entry)),
            None => Ok(None),
        }
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        self.cache
            .insert(build_cache_key(namespace, key), entry)
            .await;
        Ok(())
    }

    async fn remove(&self, namespace: &str, keys: &[&str]) -> Result<(), CacheError> {
        for key in keys {
            self.cache.invalidate(&build_cache_key(namespace, key)).await;
        }
        Ok(())
    }
}
