//! Shared utilities for the cache layer.

use std::fmt::Display;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Build a cache key from an entity prefix and a stringified id.
///
/// Format: `{prefix}:{id}`. Prefixes are per entity type and must be distinct.
pub fn build_cache_key<K: Display>(prefix: &str, key: K) -> String {
    format!("{}:{}", prefix, key)
}

/// Get the current time in milliseconds since UNIX epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Absolute expiry timestamp (unix millis) for a value written now.
pub fn expires_at(ttl: Duration) -> i64 {
    now_ms().saturating_add(ttl.as_millis() as i64)
}
