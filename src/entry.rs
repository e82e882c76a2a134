use serde::{Deserialize, Serialize};

use crate::utils::now_ms;

/// What a store holds for a single key.
///
/// A key is never simultaneously present and placeholdered: writing either
/// variant replaces the other. "Absent" has no variant, stores return `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredEntry {
    /// A serialized record, valid until `expires_at` (unix millis).
    Present { data: String, expires_at: i64 },
    /// Negative marker: storage confirmed the record does not exist.
    Placeholder { expires_at: i64 },
}

impl StoredEntry {
    /// Create an entry for a serialized value.
    pub fn present(data: String, expires_at: i64) -> Self {
        StoredEntry::Present { data, expires_at }
    }

    /// Create a not-found marker.
    pub fn placeholder(expires_at: i64) -> Self {
        StoredEntry::Placeholder { expires_at }
    }

    /// Get the expiry timestamp.
    pub fn expires_at(&self) -> i64 {
        match self {
            StoredEntry::Present { expires_at, .. } => *expires_at,
            StoredEntry::Placeholder { expires_at } => *expires_at,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, StoredEntry::Placeholder { .. })
    }

    /// Check if the entry has expired and should not be used.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at()
    }

    /// Milliseconds left before expiry, `None` once expired.
    pub fn remaining_ms(&self) -> Option<u64> {
        let left = self.expires_at() - now_ms();
        (left > 0).then_some(left as u64)
    }
}
