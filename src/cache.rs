use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::CacheSettings;
use crate::entity::Entity;
use crate::entry::StoredEntry;
use crate::error::CacheError;
use crate::store::Store;
use crate::utils::expires_at;

/// Typed cache for one entity type.
///
/// Records are kept as JSON under `{T::CACHE_PREFIX}:{id}`. A key holds
/// either a record or a placeholder, never both: every write replaces what
/// was there.
///
/// The underlying store is type-agnostic, so one store can back the caches
/// of every entity type.
pub struct EntityCache<T> {
    store: Arc<dyn Store>,
    ttl: Duration,
    placeholder_ttl: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        EntityCache {
            store: Arc::clone(&self.store),
            ttl: self.ttl,
            placeholder_ttl: self.placeholder_ttl,
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> EntityCache<T> {
    pub fn new(store: Arc<dyn Store>, settings: CacheSettings) -> Self {
        EntityCache {
            store,
            ttl: settings.ttl,
            placeholder_ttl: settings.placeholder_ttl,
            _marker: PhantomData,
        }
    }

    pub fn prefix(&self) -> &'static str {
        T::CACHE_PREFIX
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Return the cached record.
    ///
    /// `Ok(None)` is a miss. A placeholder comes back as
    /// [`CacheError::Placeholder`]; check with [`EntityCache::is_placeholder`].
    pub async fn get(&self, id: u64) -> Result<Option<T>, CacheError> {
        let key = id.to_string();
        match self.store.get(T::CACHE_PREFIX, &key).await? {
            None => Ok(None),
            Some(StoredEntry::Placeholder { .. }) => Err(CacheError::Placeholder {
                key: self.key(id),
            }),
            Some(StoredEntry::Present { data, .. }) => decode(&data).map(Some),
        }
    }

    pub async fn set(&self, record: &T) -> Result<(), CacheError> {
        let entry = StoredEntry::present(encode(record)?, expires_at(self.ttl));
        self.store
            .set(T::CACHE_PREFIX, &record.id().to_string(), entry)
            .await
    }

    /// Cached records among `ids`. Misses and placeholders are both left out.
    pub async fn get_many(&self, ids: &[u64]) -> Result<HashMap<u64, T>, CacheError> {
        let keys: Vec<String> = ids.iter().map(u64::to_string).collect();
        let entries = self.store.get_many(T::CACHE_PREFIX, &keys).await?;

        let mut found = HashMap::with_capacity(entries.len());
        for (key, entry) in entries {
            let StoredEntry::Present { data, .. } = entry else {
                continue;
            };
            // An undecodable entry is left out and reads as a miss.
            match decode::<T>(&data) {
                Ok(record) => {
                    found.insert(record.id(), record);
                }
                Err(err) => {
                    warn!(prefix = T::CACHE_PREFIX, key = %key, error = %err, "skipping undecodable cache entry");
                }
            }
        }
        Ok(found)
    }

    /// Cache every record under its own id.
    pub async fn set_many(&self, records: &[T]) -> Result<(), CacheError> {
        if records.is_empty() {
            return Ok(());
        }
        let expires = expires_at(self.ttl);
        let entries = records
            .iter()
            .map(|record| {
                Ok((
                    record.id().to_string(),
                    StoredEntry::present(encode(record)?, expires),
                ))
            })
            .collect::<Result<Vec<_>, CacheError>>()?;
        self.store.set_many(T::CACHE_PREFIX, entries).await
    }

    /// Mark `id` as known absent for the placeholder TTL.
    pub async fn set_placeholder(&self, id: u64) -> Result<(), CacheError> {
        self.store
            .set(
                T::CACHE_PREFIX,
                &id.to_string(),
                StoredEntry::placeholder(expires_at(self.placeholder_ttl)),
            )
            .await
    }

    pub async fn set_placeholders(&self, ids: &[u64]) -> Result<(), CacheError> {
        if ids.is_empty() {
            return Ok(());
        }
        let expires = expires_at(self.placeholder_ttl);
        let entries = ids
            .iter()
            .map(|id| (id.to_string(), StoredEntry::placeholder(expires)))
            .collect();
        self.store.set_many(T::CACHE_PREFIX, entries).await
    }

    /// Drop whatever the key holds, record or placeholder.
    pub async fn remove(&self, id: u64) -> Result<(), CacheError> {
        self.remove_many(&[id]).await
    }

    pub async fn remove_many(&self, ids: &[u64]) -> Result<(), CacheError> {
        if ids.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = ids.iter().map(u64::to_string).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.store.remove(T::CACHE_PREFIX, &keys).await
    }

    /// True when `err` means the key holds a placeholder.
    pub fn is_placeholder(err: &CacheError) -> bool {
        err.is_placeholder()
    }

    fn key(&self, id: u64) -> String {
        crate::utils::build_cache_key(T::CACHE_PREFIX, id)
    }
}

fn encode<T: Entity>(record: &T) -> Result<String, CacheError> {
    serde_json::to_string(record)
        .map_err(|e| CacheError::Serialization(format!("Serialization failed: {}", e)))
}

fn decode<T: Entity>(data: &str) -> Result<T, CacheError> {
    serde_json::from_str(data)
        .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e)))
}
