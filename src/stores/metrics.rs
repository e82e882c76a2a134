//! Observability decorator for cache stores.
//!
//! `MetricsStore` wraps any store and reports every read, write and remove
//! to a user-provided sink. Placeholder reads are reported separately from
//! hits so penetration attempts show up on their own.
//!
//! # Example
//!
//! ```ignore
//! let moka: Arc<dyn Store> = Arc::new(MokaStore::new(MokaStoreConfig::default()));
//! let store: Arc<dyn Store> = Arc::new(MetricsStore::new(moka, sink.clone()));
//! let repo = Repository::<UserBasic, _>::new(storage, Some(store));
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::entry::StoredEntry;
use crate::error::CacheError;
use crate::store::Store;

/// What a read found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Miss,
    Hit,
    /// The key holds a not-found placeholder.
    Placeholder,
    Error,
}

#[derive(Debug, Clone)]
pub enum CacheMetric {
    /// One per key on `get` and `get_many`.
    Read {
        namespace: String,
        key: String,
        outcome: ReadOutcome,
        latency_ms: f64,
        tier: &'static str,
    },
    /// One per `set` or `set_many` call.
    Write {
        namespace: String,
        key_count: usize,
        placeholders: usize,
        latency_ms: f64,
        tier: &'static str,
    },
    Remove {
        namespace: String,
        key_count: usize,
        first_key: Option<String>,
        latency_ms: f64,
        tier: &'static str,
    },
}

/// Receives metrics from a [`MetricsStore`].
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Called inline on every store operation; keep it cheap.
    fn emit(&self, metric: CacheMetric);

    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct MetricsStore {
    inner: Arc<dyn Store>,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsStore {
    pub fn new(inner: Arc<dyn Store>, sink: Arc<dyn MetricsSink>) -> Self {
        MetricsStore { inner, sink }
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    fn outcome(entry: Option<&StoredEntry>) -> ReadOutcome {
        match entry {
            Some(entry) if entry.is_placeholder() => ReadOutcome::Placeholder,
            Some(_) => ReadOutcome::Hit,
            None => ReadOutcome::Miss,
        }
    }

    fn read(&self, namespace: &str, key: &str, outcome: ReadOutcome, started: Instant) {
        self.sink.emit(CacheMetric::Read {
            namespace: namespace.to_string(),
            key: key.to_string(),
            outcome,
            latency_ms: elapsed_ms(started),
            tier: self.inner.name(),
        });
    }

    fn write(&self, namespace: &str, key_count: usize, placeholders: usize, started: Instant) {
        self.sink.emit(CacheMetric::Write {
            namespace: namespace.to_string(),
            key_count,
            placeholders,
            latency_ms: elapsed_ms(started),
            tier: self.inner.name(),
        });
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[async_trait]
impl Store for MetricsStore {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let started = Instant::now();
        let result = self.inner.get(namespace, key).await;
        let outcome = match &result {
            Ok(entry) => Self::outcome(entry.as_ref()),
            Err(_) => ReadOutcome::Error,
        };
        self.read(namespace, key, outcome, started);
        result
    }

    async fn get_many(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> Result<HashMap<String, StoredEntry>, CacheError> {
        let started = Instant::now();
        let result = self.inner.get_many(namespace, keys).await;
        for key in keys {
            let outcome = match &result {
                Ok(found) => Self::outcome(found.get(key)),
                Err(_) => ReadOutcome::Error,
            };
            self.read(namespace, key, outcome, started);
        }
        result
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        let placeholders = usize::from(entry.is_placeholder());
        let started = Instant::now();
        let result = self.inner.set(namespace, key, entry).await;
        self.write(namespace, 1, placeholders, started);
        result
    }

    async fn set_many(
        &self,
        namespace: &str,
        entries: Vec<(String, StoredEntry)>,
    ) -> Result<(), CacheError> {
        let key_count = entries.len();
        let placeholders = entries.iter().filter(|(_, e)| e.is_placeholder()).count();
        let started = Instant::now();
        let result = self.inner.set_many(namespace, entries).await;
        self.write(namespace, key_count, placeholders, started);
        result
    }

    async fn remove(&self, namespace: &str, keys: &[&str]) -> Result<(), CacheError> {
        let started = Instant::now();
        let result = self.inner.remove(namespace, keys).await;
        self.sink.emit(CacheMetric::Remove {
            namespace: namespace.to_string(),
            key_count: keys.len(),
            first_key: keys.first().map(|k| k.to_string()),
            latency_ms: elapsed_ms(started),
            tier: self.inner.name(),
        });
        result
    }
}
