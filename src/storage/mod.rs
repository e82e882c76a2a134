//! Storage backends: the system of record behind the cache.
//!
//! A backend owns ids, timestamps and the soft-delete marker. Every read,
//! count and update it performs skips rows whose `deleted_at` is set.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::{PoolConfig, SqliteStorage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entity::{Entity, Value};
use crate::error::StorageError;
use crate::query::{Filter, Page};

/// Relational storage for one entity type.
///
/// `Tx` is an open transaction. The `*_in` methods run the same mutation as
/// their plain counterparts inside it; nothing is visible to other callers
/// until [`commit`](StorageBackend::commit).
#[async_trait]
pub trait StorageBackend<T: Entity>: Send + Sync {
    type Tx: Send;

    /// Insert a record and return the new id. Unset timestamps are stamped
    /// with the current time.
    async fn insert(&self, record: &T) -> Result<u64, StorageError>;

    async fn find_by_id(&self, id: u64) -> Result<Option<T>, StorageError>;

    /// Live records among `ids`, in no particular order.
    async fn find_by_ids(&self, ids: &[u64]) -> Result<Vec<T>, StorageError>;

    /// First live record matching `filter`, lowest id first.
    async fn find_first(&self, filter: &Filter) -> Result<Option<T>, StorageError>;

    async fn count(&self, filter: &Filter) -> Result<i64, StorageError>;

    async fn find_page(&self, filter: &Filter, page: &Page) -> Result<Vec<T>, StorageError>;

    /// Write `patch` plus a fresh `updated_at` to a live row. Returns rows affected.
    async fn update_columns(&self, id: u64, patch: &[(&'static str, Value)])
    -> Result<u64, StorageError>;

    /// Set `deleted_at` on the live rows among `ids`. Returns rows affected.
    async fn soft_delete(&self, ids: &[u64]) -> Result<u64, StorageError>;

    async fn begin(&self) -> Result<Self::Tx, StorageError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StorageError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StorageError>;

    async fn insert_in(&self, tx: &mut Self::Tx, record: &T) -> Result<u64, StorageError>;

    async fn update_in(
        &self,
        tx: &mut Self::Tx,
        id: u64,
        patch: &[(&'static str, Value)],
    ) -> Result<u64, StorageError>;

    async fn soft_delete_in(&self, tx: &mut Self::Tx, ids: &[u64]) -> Result<u64, StorageError>;
}

/// `created_at`/`updated_at` for a new row: the record's own when set,
/// otherwise now.
pub(crate) fn creation_times<T: Entity>(record: &T) -> (DateTime<Utc>, DateTime<Utc>) {
    let model = record.model();
    if model.created_at == DateTime::<Utc>::default() {
        let now = Utc::now();
        (now, now)
    } else {
        (model.created_at, model.updated_at.max(model.created_at))
    }
}
