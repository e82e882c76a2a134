use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::entity::{Entity, Value};
use crate::error::StorageError;
use crate::query::{Filter, Page};
use crate::storage::{StorageBackend, creation_times};

/// In-process table for tests, benches and demos.
///
/// Counts every read it serves and can simulate latency or an outage, which
/// makes cache hits and coalescing observable from the outside.
pub struct MemoryStorage<T: Entity> {
    rows: RwLock<BTreeMap<u64, T>>,
    next_id: AtomicU64,
    reads: AtomicUsize,
    id_lookups: Mutex<Vec<Vec<u64>>>,
    latency: Option<Duration>,
    failing: AtomicBool,
}

/// Mutations staged until commit.
pub struct MemoryTx<T> {
    ops: Vec<TxOp<T>>,
}

enum TxOp<T> {
    Insert(T),
    Update {
        id: u64,
        patch: Vec<(&'static str, Value)>,
        at: DateTime<Utc>,
    },
    Delete {
        ids: Vec<u64>,
        at: DateTime<Utc>,
    },
}

impl<T: Entity> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> MemoryStorage<T> {
    pub fn new() -> Self {
        MemoryStorage {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            reads: AtomicUsize::new(0),
            id_lookups: Mutex::new(Vec::new()),
            latency: None,
            failing: AtomicBool::new(false),
        }
    }

    /// Delay every read by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of reads served so far (point, batch, count and page queries).
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// The id lists passed to each batch lookup, oldest first.
    pub async fn id_lookups(&self) -> Vec<Vec<u64>> {
        self.id_lookups.lock().await.clone()
    }

    /// Make every subsequent read fail until switched off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Stored row regardless of its soft-delete state.
    pub async fn raw(&self, id: u64) -> Option<T> {
        self.rows.read().await.get(&id).cloned()
    }

    async fn begin_read(&self) -> Result<(), StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("storage unavailable".to_string()));
        }
        Ok(())
    }

    fn stamp_new(&self, record: &T) -> T {
        let (created_at, updated_at) = creation_times(record);
        let mut row = record.clone();
        let model = row.model_mut();
        model.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        model.created_at = created_at;
        model.updated_at = updated_at;
        model.deleted_at = None;
        row
    }

    async fn live<F>(&self, filter: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.rows
            .read()
            .await
            .values()
            .filter(|row| !row.model().is_deleted() && filter(row))
            .cloned()
            .collect()
    }
}

fn apply_patch<T: Entity>(
    rows: &mut BTreeMap<u64, T>,
    id: u64,
    patch: &[(&'static str, Value)],
    at: DateTime<Utc>,
) -> Result<u64, StorageError> {
    let Some(row) = rows.get_mut(&id).filter(|row| !row.model().is_deleted()) else {
        return Ok(0);
    };
    for (column, value) in patch {
        row.apply(column, value.clone())?;
    }
    row.model_mut().updated_at = at;
    Ok(1)
}

fn apply_delete<T: Entity>(rows: &mut BTreeMap<u64, T>, ids: &[u64], at: DateTime<Utc>) -> u64 {
    let mut affected = 0;
    for id in ids {
        if let Some(row) = rows.get_mut(id).filter(|row| !row.model().is_deleted()) {
            let model = row.model_mut();
            model.deleted_at = Some(at);
            model.updated_at = at;
            affected += 1;
        }
    }
    affected
}

#[async_trait]
impl<T: Entity> StorageBackend<T> for MemoryStorage<T> {
    type Tx = MemoryTx<T>;

    async fn insert(&self, record: &T) -> Result<u64, StorageError> {
        let row = self.stamp_new(record);
        let id = row.id();
        self.rows.write().await.insert(id, row);
        Ok(id)
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<T>, StorageError> {
        self.begin_read().await?;
        Ok(self
            .rows
            .read()
            .await
            .get(&id)
            .filter(|row| !row.model().is_deleted())
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[u64]) -> Result<Vec<T>, StorageError> {
        self.begin_read().await?;
        self.id_lookups.lock().await.push(ids.to_vec());
        Ok(self.live(|row| ids.contains(&row.id())).await)
    }

    async fn find_first(&self, filter: &Filter) -> Result<Option<T>, StorageError> {
        self.begin_read().await?;
        Ok(self.live(|row| filter.matches(row)).await.into_iter().next())
    }

    async fn count(&self, filter: &Filter) -> Result<i64, StorageError> {
        self.begin_read().await?;
        Ok(self.live(|row| filter.matches(row)).await.len() as i64)
    }

    async fn find_page(&self, filter: &Filter, page: &Page) -> Result<Vec<T>, StorageError> {
        self.begin_read().await?;
        let mut rows = self.live(|row| filter.matches(row)).await;
        page.sort_records(&mut rows);
        Ok(rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    async fn update_columns(
        &self,
        id: u64,
        patch: &[(&'static str, Value)],
    ) -> Result<u64, StorageError> {
        apply_patch(&mut *self.rows.write().await, id, patch, Utc::now())
    }

    async fn soft_delete(&self, ids: &[u64]) -> Result<u64, StorageError> {
        Ok(apply_delete(&mut *self.rows.write().await, ids, Utc::now()))
    }

    async fn begin(&self) -> Result<Self::Tx, StorageError> {
        Ok(MemoryTx { ops: Vec::new() })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StorageError> {
        let mut rows = self.rows.write().await;
        // Validate against a scratch copy so a failing op leaves nothing applied.
        let mut staged = rows.clone();
        for op in tx.ops {
            match op {
                TxOp::Insert(row) => {
                    staged.insert(row.id(), row);
                }
                TxOp::Update { id, patch, at } => {
                    apply_patch(&mut staged, id, &patch, at)?;
                }
                TxOp::Delete { ids, at } => {
                    apply_delete(&mut staged, &ids, at);
                }
            }
        }
        *rows = staged;
        Ok(())
    }

    async fn rollback(&self, _tx: Self::Tx) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_in(&self, tx: &mut Self::Tx, record: &T) -> Result<u64, StorageError> {
        let row = self.stamp_new(record);
        let id = row.id();
        tx.ops.push(TxOp::Insert(row));
        Ok(id)
    }

    async fn update_in(
        &self,
        tx: &mut Self::Tx,
        id: u64,
        patch: &[(&'static str, Value)],
    ) -> Result<u64, StorageError> {
        let exists = self
            .rows
            .read()
            .await
            .get(&id)
            .is_some_and(|row| !row.model().is_deleted())
            || tx
                .ops
                .iter()
                .any(|op| matches!(op, TxOp::Insert(row) if row.id() == id));
        tx.ops.push(TxOp::Update {
            id,
            patch: patch.to_vec(),
            at: Utc::now(),
        });
        Ok(u64::from(exists))
    }

    async fn soft_delete_in(&self, tx: &mut Self::Tx, ids: &[u64]) -> Result<u64, StorageError> {
        let rows = self.rows.read().await;
        let affected = ids
            .iter()
            .filter(|id| rows.get(*id).is_some_and(|row| !row.model().is_deleted()))
            .count() as u64;
        tx.ops.push(TxOp::Delete {
            ids: ids.to_vec(),
            at: Utc::now(),
        });
        Ok(affected)
    }
}
