//! Cache wiring chosen at construction time.
//!
//! # Example
//!
//! ```ignore
//! let config: CacheConfig = serde_json::from_str(r#"{"type":"moka","max_capacity":50000}"#)?;
//! let store = config.build().await?;
//! let users = Repository::<UserBasic, _>::new(storage.clone(), store.clone());
//! let files = Repository::<UserRepository, _>::new(storage, store);
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::{DEFAULT_CACHE_TTL, Entity};
use crate::error::CacheError;
use crate::store::Store;
use crate::stores::memory::{HashMapStore, HashMapStoreConfig};
use crate::stores::moka::{MokaStore, MokaStoreConfig};
use crate::stores::redis::{RedisStore, RedisStoreConfig};

/// Default lifetime of a not-found placeholder.
pub const DEFAULT_PLACEHOLDER_TTL: Duration = Duration::from_secs(60);

/// Which cache store to put in front of storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheConfig {
    /// Read and write storage directly.
    None,
    Memory(HashMapStoreConfig),
    Moka(MokaStoreConfig),
    /// Required when several processes share one database.
    Redis(RedisStoreConfig),
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Memory(HashMapStoreConfig::default())
    }
}

impl CacheConfig {
    /// Build the configured store; `None` means no caching.
    pub async fn build(&self) -> Result<Option<Arc<dyn Store>>, CacheError> {
        let store: Arc<dyn Store> = match self {
            CacheConfig::None => return Ok(None),
            CacheConfig::Memory(config) => Arc::new(HashMapStore::new(config.clone())),
            CacheConfig::Moka(config) => Arc::new(MokaStore::new(config.clone())),
            CacheConfig::Redis(config) => Arc::new(RedisStore::new(config.clone()).await?),
        };
        tracing::debug!(store = store.name(), "cache store ready");
        Ok(Some(store))
    }
}

/// Entry lifetimes for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    /// Usually much shorter than `ttl`: it bounds how long a record created
    /// elsewhere can stay hidden behind a stale placeholder.
    #[serde(rename = "placeholder_ttl_ms", with = "duration_ms")]
    pub placeholder_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl: DEFAULT_CACHE_TTL,
            placeholder_ttl: DEFAULT_PLACEHOLDER_TTL,
        }
    }
}

impl CacheSettings {
    /// The entity's own TTL with the default placeholder TTL.
    pub fn for_entity<T: Entity>() -> Self {
        CacheSettings {
            ttl: T::CACHE_TTL,
            placeholder_ttl: DEFAULT_PLACEHOLDER_TTL,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
