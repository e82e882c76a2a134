use std::collections::HashMap;

use async_trait::async_trait;

use crate::entry::StoredEntry;
use crate::error::CacheError;

/// A store is a common interface for storing, reading and deleting
/// namespaced key-value pairs.
///
/// Stores are type-agnostic and work with `StoredEntry`, which carries either
/// a serialized record or a not-found placeholder together with its expiry.
/// The store implementation is responsible for never returning expired data.
///
/// In-process stores only protect a single process; when repositories run in
/// several processes they must share a networked store (e.g. redis).
#[async_trait]
pub trait Store: Send + Sync {
    /// A name for metrics/tracing.
    ///
    /// # Example
    /// - "hashmap"
    /// - "moka"
    /// - "redis"
    fn name(&self) -> &'static str;

    /// Return the cached entry.
    ///
    /// The response must be `None` for cache misses and expired entries.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>, CacheError>;

    /// Return all live entries for `keys`, keyed by the caller's key.
    ///
    /// Misses are simply left out of the map.
    async fn get_many(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> Result<HashMap<String, StoredEntry>, CacheError> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.get(namespace, key).await? {
                found.insert(key.clone(), entry);
            }
        }
        Ok(found)
    }

    /// Sets the entry for the given key, replacing whatever was there.
    ///
    /// Use `entry.expires_at()` (unix milli timestamp) to configure expiration.
    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<(), CacheError>;

    /// Sets several entries at once.
    async fn set_many(
        &self,
        namespace: &str,
        entries: Vec<(String, StoredEntry)>,
    ) -> Result<(), CacheError> {
        for (key, entry) in entries {
            self.set(namespace, &key, entry).await?;
        }
        Ok(())
    }

    /// Removes the key(s) from the store.
    async fn remove(&self, namespace: &str, keys: &[&str]) -> Result<(), CacheError>;
}
