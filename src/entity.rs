//! Entity descriptors.
//!
//! One generic repository serves every table; an [`Entity`] impl supplies the
//! per-table configuration: table name, cache prefix and TTL, the column
//! whitelist, and the fields that take part in sparse updates.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::StorageError;

/// Columns every table carries.
pub const MODEL_COLUMNS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// Default lifetime of a cached record.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Identity, timestamps and soft-delete marker shared by all records.
///
/// `id` is assigned by storage on insert and never changes afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Non-null means logically deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A dynamically typed column value, used for filters, inserts and patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Time(DateTime<Utc>),
    Text(String),
}

impl Value {
    /// Zero/empty values are skipped by sparse updates.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Time(_) => false,
            Value::Text(s) => s.is_empty(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Time(t) => f.write_str(&t.to_rfc3339()),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

/// Saturates at `i64::MAX`, which no stored id can exceed.
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Per-table configuration for the generic repository.
///
/// # Example
///
/// ```ignore
/// impl Entity for UserBasic {
///     const TABLE: &'static str = "user_basic";
///     const CACHE_PREFIX: &'static str = "userBasic";
///     const COLUMNS: &'static [&'static str] = &["id", "created_at", ..., "email"];
///
///     fn model(&self) -> &Model { &self.model }
///     fn model_mut(&mut self) -> &mut Model { &mut self.model }
///     fn fields(&self) -> Vec<(&'static str, Value)> { ... }
///     fn apply(&mut self, column: &str, value: Value) -> Result<(), StorageError> { ... }
/// }
/// ```
pub trait Entity: Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Table name in the relational store.
    const TABLE: &'static str;

    /// Cache key prefix; distinct per entity type.
    const CACHE_PREFIX: &'static str;

    /// Whitelist of column names filters and sorts may reference.
    const COLUMNS: &'static [&'static str];

    /// Lifetime of a cached record.
    const CACHE_TTL: Duration = DEFAULT_CACHE_TTL;

    fn model(&self) -> &Model;

    fn model_mut(&mut self) -> &mut Model;

    /// Entity-specific columns (everything but [`MODEL_COLUMNS`]) and their
    /// current values, in table order.
    fn fields(&self) -> Vec<(&'static str, Value)>;

    /// Write one entity-specific column. Unknown columns and type mismatches
    /// are decode errors.
    fn apply(&mut self, column: &str, value: Value) -> Result<(), StorageError>;

    fn id(&self) -> u64 {
        self.model().id
    }

    /// The sparse patch for an update: only fields holding a non-zero value.
    fn patch(&self) -> Vec<(&'static str, Value)> {
        self.fields()
            .into_iter()
            .filter(|(_, value)| !value.is_zero())
            .collect()
    }

    /// Current value of any whitelisted column.
    fn column(&self, name: &str) -> Option<Value> {
        let model = self.model();
        match name {
            "id" => Some(Value::from(model.id)),
            "created_at" => Some(Value::Time(model.created_at)),
            "updated_at" => Some(Value::Time(model.updated_at)),
            "deleted_at" => Some(Value::from(model.deleted_at)),
            _ => self
                .fields()
                .into_iter()
                .find(|(column, _)| *column == name)
                .map(|(_, value)| value),
        }
    }
}

/// Helpers for `Entity::apply` impls.
pub(crate) fn expect_text(column: &str, value: Value) -> Result<String, StorageError> {
    match value {
        Value::Text(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Err(mismatch(column, "text", &other)),
    }
}

pub(crate) fn expect_int(column: &str, value: Value) -> Result<i64, StorageError> {
    match value {
        Value::Null => Ok(0),
        other => other
            .as_i64()
            .ok_or_else(|| mismatch(column, "integer", &other)),
    }
}

pub(crate) fn unknown_column(column: &str) -> StorageError {
    StorageError::Decode {
        column: column.to_string(),
        message: "unknown column".to_string(),
    }
}

fn mismatch(column: &str, expected: &str, got: &Value) -> StorageError {
    StorageError::Decode {
        column: column.to_string(),
        message: format!("expected {}, got {:?}", expected, got),
    }
}
