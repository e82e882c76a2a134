use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::EntityCache;
use crate::coalesce::Coalescer;
use crate::config::CacheSettings;
use crate::entity::Entity;
use crate::error::{RepoError, StorageError};
use crate::query::{Conditions, Filter, Operator, Page, Params};
use crate::storage::StorageBackend;
use crate::store::Store;

/// Cached data access for one entity type.
///
/// Reads go through the cache when one is configured:
/// - a cached record is returned without touching storage;
/// - a placeholder answers [`RepoError::NotFound`] without touching storage;
/// - a miss is fetched once per id no matter how many callers are waiting,
///   then cached (or placeholdered when storage has no such row).
///
/// Every mutation removes the affected cache keys after storage accepts it;
/// the next read repopulates them. Cache failures are logged and never fail
/// the call, since storage is the source of truth.
pub struct Repository<T: Entity, B: StorageBackend<T>> {
    storage: Arc<B>,
    cache: Option<EntityCache<T>>,
    coalescer: Coalescer<Result<T, RepoError>>,
}

impl<T: Entity, B: StorageBackend<T>> Clone for Repository<T, B> {
    fn clone(&self) -> Self {
        Repository {
            storage: Arc::clone(&self.storage),
            cache: self.cache.clone(),
            coalescer: self.coalescer.clone(),
        }
    }
}

impl<T, B> Repository<T, B>
where
    T: Entity,
    B: StorageBackend<T> + 'static,
{
    /// A repository with the entity's default cache settings. `store: None`
    /// reads and writes storage directly.
    pub fn new(storage: Arc<B>, store: Option<Arc<dyn Store>>) -> Self {
        Self::with_settings(storage, store, CacheSettings::for_entity::<T>())
    }

    pub fn with_settings(
        storage: Arc<B>,
        store: Option<Arc<dyn Store>>,
        settings: CacheSettings,
    ) -> Self {
        Repository {
            storage,
            cache: store.map(|store| EntityCache::new(store, settings)),
            coalescer: Coalescer::new(),
        }
    }

    pub fn storage(&self) -> &Arc<B> {
        &self.storage
    }

    pub fn cache(&self) -> Option<&EntityCache<T>> {
        self.cache.as_ref()
    }

    /// Insert `record` and write the generated id and timestamps back onto it.
    ///
    /// The cache is not populated; the first read loads the record. Any
    /// placeholder left by an earlier probe of the same id is removed so the
    /// new row is visible at once.
    pub async fn create(&self, record: &mut T) -> Result<(), RepoError> {
        stamp_created(record);
        let id = self.storage.insert(record).await?;
        record.model_mut().id = id;
        self.invalidate(&[id]).await;
        Ok(())
    }

    /// [`create`](Self::create) inside `tx`. Returns the new id.
    pub async fn create_by_tx(&self, tx: &mut B::Tx, record: &mut T) -> Result<u64, RepoError> {
        stamp_created(record);
        let id = self.storage.insert_in(tx, record).await?;
        record.model_mut().id = id;
        self.invalidate(&[id]).await;
        Ok(id)
    }

    /// Sparse update of `record.id()`: only non-zero fields are written.
    pub async fn update_by_id(&self, record: &T) -> Result<(), RepoError> {
        let id = record.id();
        validate_id(id)?;
        self.storage.update_columns(id, &record.patch()).await?;
        self.invalidate(&[id]).await;
        Ok(())
    }

    pub async fn update_by_tx(&self, tx: &mut B::Tx, record: &T) -> Result<(), RepoError> {
        let id = record.id();
        validate_id(id)?;
        self.storage.update_in(tx, id, &record.patch()).await?;
        self.invalidate(&[id]).await;
        Ok(())
    }

    /// Soft delete.
    pub async fn delete_by_id(&self, id: u64) -> Result<(), RepoError> {
        validate_id(id)?;
        self.storage.soft_delete(&[id]).await?;
        self.invalidate(&[id]).await;
        Ok(())
    }

    /// Soft delete of several rows in one statement.
    pub async fn delete_by_ids(&self, ids: &[u64]) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Err(RepoError::Validation("ids cannot be empty".to_string()));
        }
        ids.iter().try_for_each(|id| validate_id(*id))?;

        self.storage.soft_delete(ids).await?;
        self.invalidate(ids).await;
        Ok(())
    }

    pub async fn delete_by_tx(&self, tx: &mut B::Tx, id: u64) -> Result<(), RepoError> {
        validate_id(id)?;
        self.storage.soft_delete_in(tx, &[id]).await?;
        self.invalidate(&[id]).await;
        Ok(())
    }

    pub async fn get_by_id(&self, id: u64) -> Result<T, RepoError> {
        validate_id(id)?;

        let Some(cache) = &self.cache else {
            return self.storage.find_by_id(id).await?.ok_or(RepoError::NotFound);
        };

        match cache.get(id).await {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(err) if err.is_placeholder() => return Err(RepoError::NotFound),
            Err(err) => {
                warn!(prefix = T::CACHE_PREFIX, id, error = %err, "cache read failed, falling back to storage");
            }
        }

        let storage = Arc::clone(&self.storage);
        let cache = cache.clone();
        self.coalescer
            .run(&id.to_string(), move || fetch_and_fill(storage, cache, id))
            .await
    }

    /// Look up several ids at once.
    ///
    /// Ids with no live record are left out of the map rather than reported
    /// as errors.
    pub async fn get_by_ids(&self, ids: &[u64]) -> Result<HashMap<u64, T>, RepoError> {
        ids.iter().try_for_each(|id| validate_id(*id))?;
        let ids = dedup(ids);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let Some(cache) = &self.cache else {
            let records = self.storage.find_by_ids(&ids).await?;
            return Ok(records.into_iter().map(|r| (r.id(), r)).collect());
        };

        let mut found = match cache.get_many(&ids).await {
            Ok(found) => found,
            Err(err) => {
                warn!(prefix = T::CACHE_PREFIX, error = %err, "cache batch read failed");
                HashMap::new()
            }
        };

        // Probe each miss on its own to tell placeholders from real misses.
        let missed: Vec<u64> = ids
            .iter()
            .copied()
            .filter(|id| !found.contains_key(id))
            .collect();
        let mut real_misses = Vec::new();
        for id in missed {
            match cache.get(id).await {
                Ok(Some(record)) => {
                    found.insert(id, record);
                }
                Ok(None) => real_misses.push(id),
                Err(err) if err.is_placeholder() => {}
                Err(err) => {
                    warn!(prefix = T::CACHE_PREFIX, id, error = %err, "cache read failed");
                    real_misses.push(id);
                }
            }
        }

        if real_misses.is_empty() {
            return Ok(found);
        }

        let records = self.storage.find_by_ids(&real_misses).await?;

        if let Err(err) = cache.set_many(&records).await {
            warn!(prefix = T::CACHE_PREFIX, count = records.len(), error = %err, "cache batch write failed");
        }

        let returned: HashSet<u64> = records.iter().map(Entity::id).collect();
        let absent: Vec<u64> = real_misses
            .into_iter()
            .filter(|id| !returned.contains(id))
            .collect();
        if !absent.is_empty() {
            match cache.set_placeholders(&absent).await {
                Ok(()) => debug!(prefix = T::CACHE_PREFIX, ids = ?absent, "installed placeholders"),
                Err(err) => {
                    warn!(prefix = T::CACHE_PREFIX, ids = ?absent, error = %err, "placeholder write failed")
                }
            }
        }

        found.extend(records.into_iter().map(|r| (r.id(), r)));
        Ok(found)
    }

    /// A page of records matching `params`, plus the total match count.
    ///
    /// When the count is zero the page query is skipped. With
    /// `params.skip_count` no count is run and the returned total is 0.
    pub async fn get_by_columns(&self, params: &Params) -> Result<(Vec<T>, i64), RepoError> {
        let (filter, page) = params.to_query::<T>()?;

        let total = if params.skip_count {
            0
        } else {
            let total = self.storage.count(&filter).await?;
            if total == 0 {
                return Ok((Vec::new(), 0));
            }
            total
        };

        let records = self.storage.find_page(&filter, &page).await?;
        Ok((records, total))
    }

    /// The first record (lowest id) matching `conditions`. Not cached.
    pub async fn get_by_condition(&self, conditions: &Conditions) -> Result<T, RepoError> {
        if conditions.columns.is_empty() {
            return Err(RepoError::Validation("conditions cannot be empty".to_string()));
        }
        let filter = conditions.to_filter::<T>()?;
        self.storage
            .find_first(&filter)
            .await?
            .ok_or(RepoError::NotFound)
    }

    /// Up to `limit` records with an id strictly below `last_id`, ordered by
    /// `sort` (see [`Params::sort`]).
    pub async fn get_by_last_id(
        &self,
        last_id: u64,
        limit: u32,
        sort: &str,
    ) -> Result<Vec<T>, RepoError> {
        let page = Page::new::<T>(0, limit, sort)?;
        let filter = Filter::term("id", Operator::Lt, last_id);
        Ok(self.storage.find_page(&filter, &page).await?)
    }

    /// Start a storage transaction for the `*_by_tx` methods.
    pub async fn begin(&self) -> Result<B::Tx, RepoError> {
        Ok(self.storage.begin().await?)
    }

    pub async fn commit(&self, tx: B::Tx) -> Result<(), RepoError> {
        Ok(self.storage.commit(tx).await?)
    }

    /// Roll back `tx`. Cache keys already invalidated stay invalidated.
    pub async fn rollback(&self, tx: B::Tx) -> Result<(), RepoError> {
        Ok(self.storage.rollback(tx).await?)
    }

    async fn invalidate(&self, ids: &[u64]) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(err) = cache.remove_many(ids).await {
            warn!(prefix = T::CACHE_PREFIX, ids = ?ids, error = %err, "cache invalidation failed");
        }
    }
}

/// Storage read for a cache miss, run once per id by the coalescer.
async fn fetch_and_fill<T, B>(storage: Arc<B>, cache: EntityCache<T>, id: u64) -> Result<T, RepoError>
where
    T: Entity,
    B: StorageBackend<T>,
{
    debug!(prefix = T::CACHE_PREFIX, id, "cache miss, loading from storage");

    match storage.find_by_id(id).await {
        Ok(Some(record)) => {
            if let Err(err) = cache.set(&record).await {
                warn!(prefix = T::CACHE_PREFIX, id, error = %err, "cache write failed");
            }
            Ok(record)
        }
        Ok(None) | Err(StorageError::NotFound) => {
            match cache.set_placeholder(id).await {
                Ok(()) => debug!(prefix = T::CACHE_PREFIX, id, "installed placeholder"),
                Err(err) => {
                    warn!(prefix = T::CACHE_PREFIX, id, error = %err, "placeholder write failed")
                }
            }
            Err(RepoError::NotFound)
        }
        Err(err) => Err(err.into()),
    }
}

fn validate_id(id: u64) -> Result<(), RepoError> {
    if id == 0 {
        return Err(RepoError::Validation("id cannot be 0".to_string()));
    }
    // Storage keys are signed 64-bit.
    if i64::try_from(id).is_err() {
        return Err(RepoError::Validation(format!("id {} is out of range", id)));
    }
    Ok(())
}

fn dedup(ids: &[u64]) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn stamp_created<T: Entity>(record: &mut T) {
    let now = chrono::Utc::now();
    let model = record.model_mut();
    model.created_at = now;
    model.updated_at = now;
    model.deleted_at = None;
}
