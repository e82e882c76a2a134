//! Store implementations for the cache layer.

pub mod memory;
pub mod metrics;
pub mod moka;
pub mod redis;

pub use memory::{EvictOnSetConfig, HashMapStore, HashMapStoreConfig};
pub use metrics::{CacheMetric, MetricsSink, MetricsStore, ReadOutcome};
pub use moka::{MokaStore, MokaStoreConfig};
pub use redis::{RedisStore, RedisStoreConfig};
