use std::sync::Arc;

use crate::query::QueryError;

/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A cache operation failed.
    #[error("[{tier}] cache error for key '{key}': {message}")]
    Operation {
        tier: String,
        key: String,
        message: String,
    },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The key holds a not-found placeholder: storage already confirmed the
    /// record does not exist.
    #[error("placeholder hit for key '{key}'")]
    Placeholder { key: String },
}

impl CacheError {
    /// Create a new operation error.
    pub fn operation(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Distinguishes "known absent" from "never looked up" or a failed read.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, CacheError::Placeholder { .. })
    }
}

/// Errors raised by a storage backend.
///
/// Cloneable so that a single coalesced fetch can hand the same failure to
/// every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(Arc<sqlx::Error>),

    #[error("failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("storage error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::Database(Arc::new(other)),
        }
    }
}

/// Errors returned by [`Repository`](crate::Repository) operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoError {
    /// Rejected before any I/O (zero id, empty id list, bad filter or sort column).
    #[error("validation error: {0}")]
    Validation(String),

    /// Either confirmed absent by storage or answered by a placeholder.
    #[error("record not found")]
    NotFound,

    #[error(transparent)]
    Storage(StorageError),

    /// Only surfaced while wiring a repository up; cache failures on the
    /// read/write paths are logged instead.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RepoError::Validation(_))
    }
}

impl From<StorageError> for RepoError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => RepoError::NotFound,
            other => RepoError::Storage(other),
        }
    }
}

impl From<QueryError> for RepoError {
    fn from(err: QueryError) -> Self {
        RepoError::Validation(err.to_string())
    }
}
