//! dao-cache - A read-through cached data-access layer for Rust
//!
//! This library puts a cache in front of a relational store with:
//! - Per-id request coalescing (one storage read per cache miss, however many callers)
//! - Not-found placeholders that stop repeated lookups of missing ids
//! - Batch lookups that reconcile partial cache hits with a single storage query
//! - Invalidate-on-write for updates, deletes and their transactional variants
//! - Whitelisted filters, sorting and pagination
//!
//! One generic [`Repository`] serves every table; an [`Entity`] impl supplies
//! the table name, cache prefix, TTL and column whitelist.
//!
//! # Example
//!
//! ```ignore
//! use dao_cache::{CacheConfig, Repository, SqliteStorage, UserBasic};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(SqliteStorage::connect("sqlite://files.db").await?);
//!     let store = CacheConfig::default().build().await?;
//!
//!     let users = Repository::<UserBasic, _>::new(storage, store);
//!
//!     let mut alice = UserBasic { name: "alice".into(), ..Default::default() };
//!     users.create(&mut alice).await?;
//!
//!     // First read loads from storage, later reads are served from cache.
//!     let user = users.get_by_id(alice.model.id).await?;
//!     Ok(())
//! }
//! ```

mod cache;
mod coalesce;
mod config;
mod entity;
mod entry;
mod error;
pub mod model;
pub mod query;
mod repository;
pub mod storage;
mod store;
pub mod stores;
mod utils;

// Re-export public API
pub use cache::EntityCache;
pub use coalesce::Coalescer;
pub use config::{CacheConfig, CacheSettings, DEFAULT_PLACEHOLDER_TTL};
pub use entity::{DEFAULT_CACHE_TTL, Entity, MODEL_COLUMNS, Model, Value};
pub use entry::StoredEntry;
pub use error::{CacheError, RepoError, StorageError};
pub use model::{RepositoryPool, ShareBasic, UserBasic, UserRepository};
pub use query::{Column, Conditions, Filter, Logic, Operator, Page, Params, QueryError};
pub use repository::Repository;
pub use storage::{MemoryStorage, PoolConfig, SqliteStorage, StorageBackend};
pub use store::Store;
pub use stores::memory::{EvictOnSetConfig, HashMapStore, HashMapStoreConfig};
pub use stores::metrics::{CacheMetric, MetricsSink, MetricsStore, ReadOutcome};
pub use stores::moka::{MokaStore, MokaStoreConfig};
pub use stores::redis::{RedisStore, RedisStoreConfig};
pub use utils::build_cache_key;
