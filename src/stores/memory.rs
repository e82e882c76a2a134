use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::entry::StoredEntry;
use crate::error::CacheError;
use crate::store::Store;
use crate::utils::{build_cache_key, now_ms};

/// Share of writes that sweep expired entries in the default configuration.
pub const DEFAULT_EVICT_FREQUENCY: f64 = 0.01;

/// Size cap of the default configuration.
pub const DEFAULT_MAX_ITEMS: usize = 100_000;

/// Configuration for eviction on set operations.
#[derive(Debug, Clone, Deserialize)]
pub struct EvictOnSetConfig {
    /// Provide a number between 0 and 1 to calculate whether an expiry sweep should run on each set.
    ///
    /// - `1.0` -> sweep on every `set`
    /// - `0.5` -> sweep on every 2nd `set` (on average)
    /// - `0.0` -> never sweep; only the `max_items` cap applies
    pub frequency: f64,

    /// Once a write leaves more than `max_items` keys, the entries closest to
    /// expiry are dropped until the map is back at `max_items`.
    pub max_items: usize,
}

impl Default for EvictOnSetConfig {
    fn default() -> Self {
        EvictOnSetConfig {
            frequency: DEFAULT_EVICT_FREQUENCY,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

/// Configuration for HashMapStore.
///
/// Placeholders are written for ids chosen by callers, so the default keeps
/// eviction on. `evict_on_set: None` gives an unbounded map that only drops
/// an expired key when that key is read again.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HashMapStoreConfig {
    pub evict_on_set: Option<EvictOnSetConfig>,
}

impl Default for HashMapStoreConfig {
    fn default() -> Self {
        HashMapStoreConfig {
            evict_on_set: Some(EvictOnSetConfig::default()),
        }
    }
}

/// Thread-safe in-memory cache store using HashMap with RwLock.
///
/// Suitable for single-process deployments and tests. Entries are kept
/// serialized, so a hit hands out an independent copy of the record.
///
/// For high-concurrency scenarios, consider using `MokaStore` instead.
pub struct HashMapStore {
    state: RwLock<HashMap<String, StoredEntry>>,
    evict_on_set: Option<EvictOnSetConfig>,
}

impl HashMapStore {
    /// Create a new HashMapStore with the given configuration.
    pub fn new(config: HashMapStoreConfig) -> Self {
        HashMapStore {
            state: RwLock::new(HashMap::new()),
            evict_on_set: config.evict_on_set,
        }
    }

    /// Number of keys currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    /// Called with the write lock of the set that triggered it.
    fn maybe_evict(&self, state: &mut HashMap<String, StoredEntry>) {
        let Some(ref config) = self.evict_on_set else {
            return;
        };

        let over_budget = state.len() > config.max_items;
        let sweep = config.frequency >= 1.0
            || (config.frequency > 0.0 && rand::thread_rng().gen_bool(config.frequency));

        if sweep || over_budget {
            let now = now_ms();
            state.retain(|_, v| !v.is_expired(now));
        }

        // Still over budget: drop the entries closest to expiry first.
        if state.len() > config.max_items {
            let mut entries: Vec<_> = state
                .iter()
                .map(|(k, v)| (k.clone(), v.expires_at()))
                .collect();
            entries.sort_by_key(|(_, expires)| *expires);

            let to_remove = state.len() - config.max_items;
            for (key, _) in entries.into_iter().take(to_remove) {
                state.remove(&key);
            }
        }
    }
}

#[async_trait]
impl Store for HashMapStore {
    fn name(&self) -> &'static str {
        "hashmap"
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let cache_key = build_cache_key(namespace, key);
        let state = self.state.read().await;

        let Some(stored) = state.get(&cache_key) else {
            return Ok(None);
        };

        if stored.is_expired(now_ms()) {
            drop(state);
            let mut state = self.state.write().await;
            // Re-check: a fresh value may have landed between the two locks.
            if state
                .get(&cache_key)
                .is_some_and(|entry| entry.is_expired(now_ms()))
            {
                state.remove(&cache_key);
            }
            return Ok(None);
        }

        Ok(Some(stored.clone()))
    }

    async fn get_many(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> Result<HashMap<String, StoredEntry>, CacheError> {
        let state = self.state.read().await;
        let now = now_ms();

        Ok(keys
            .iter()
            .filter_map(|key| {
                state
                    .get(&build_cache_key(namespace, key))
                    .filter(|entry| !entry.is_expired(now))
                    .map(|entry| (key.clone(), entry.clone()))
            })
            .collect())
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        let cache_key = build_cache_key(namespace, key);

        let mut state = self.state.write().await;
        state.insert(cache_key, entry);
        self.maybe_evict(&mut state);
        Ok(())
    }

    async fn set_many(
        &self,
        namespace: &str,
        entries: Vec<(String, StoredEntry)>,
    ) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        for (key, entry) in entries {
            state.insert(build_cache_key(namespace, &key), entry);
        }
        self.maybe_evict(&mut state);
        Ok(())
    }

    async fn remove(&self, namespace: &str, keys: &[&str]) -> Result<(), CacheError> {
        let mut state = self.state.write().await;

        for key in keys {
            state.remove(&build_cache_key(namespace, key));
        }

        Ok(())
    }
}
