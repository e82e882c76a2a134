//! SQLite backend over a sqlx pool.
//!
//! One `SqliteStorage` serves every entity type; SQL is assembled from the
//! entity's table name and column list, and rows are decoded by column name.
//! Timestamps are stored as RFC 3339 text with microsecond precision so that
//! lexical order matches time order.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::entity::{Entity, Value};
use crate::error::StorageError;
use crate::query::{Filter, Page};
use crate::storage::{StorageBackend, creation_times};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

/// A statement and its bind values.
struct Statement {
    sql: String,
    args: Vec<Value>,
}

impl Statement {
    fn new(sql: String, args: Vec<Value>) -> Self {
        Statement { sql, args }
    }

    fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        self.args
            .iter()
            .fold(sqlx::query(&self.sql), |query, value| match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Int(i) => query.bind(*i),
                Value::Time(t) => query.bind(format_time(t)),
                Value::Text(s) => query.bind(s.clone()),
            })
    }
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStorage { pool }
    }

    /// Open a WAL-mode pool with default sizing.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        Self::connect_with(database_url, PoolConfig::default()).await
    }

    /// Open a WAL-mode pool.
    ///
    /// An in-memory database lives only as long as its connection, so for
    /// `sqlite::memory:` the pool is pinned to a single connection that never
    /// idles out.
    pub async fn connect_with(database_url: &str, config: PoolConfig) -> Result<Self, StorageError> {
        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
        pool_options = if database_url.contains(":memory:") {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
        };

        let pool = pool_options.connect_with(connect_options).await?;
        Ok(SqliteStorage { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `CREATE TABLE IF NOT EXISTS` for `T`, derived from its fields.
    pub async fn create_table<T: Entity>(&self) -> Result<(), StorageError> {
        let mut columns = vec![
            "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            "created_at TEXT NOT NULL".to_string(),
            "updated_at TEXT NOT NULL".to_string(),
            "deleted_at TEXT".to_string(),
        ];
        for (column, prototype) in T::default().fields() {
            let definition = match prototype {
                Value::Int(_) | Value::Bool(_) => "INTEGER NOT NULL DEFAULT 0",
                Value::Time(_) => "TEXT",
                Value::Null | Value::Text(_) => "TEXT NOT NULL DEFAULT ''",
            };
            columns.push(format!("{} {}", column, definition));
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            T::TABLE,
            columns.join(", ")
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    fn select<T: Entity>(condition: &str) -> String {
        format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND ({})",
            T::COLUMNS.join(", "),
            T::TABLE,
            condition
        )
    }

    fn insert_statement<T: Entity>(record: &T) -> Statement {
        let (created_at, updated_at) = creation_times(record);
        let fields = record.fields();

        let mut columns = vec!["created_at", "updated_at"];
        let mut args = vec![Value::Time(created_at), Value::Time(updated_at)];
        for (column, value) in fields {
            columns.push(column);
            args.push(value);
        }

        let marks = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::TABLE,
            columns.join(", "),
            marks
        );
        Statement::new(sql, args)
    }

    fn update_statement<T: Entity>(id: u64, patch: &[(&'static str, Value)]) -> Statement {
        let mut sets = vec!["updated_at = ?".to_string()];
        let mut args = vec![Value::Time(Utc::now())];
        for (column, value) in patch {
            sets.push(format!("{} = ?", column));
            args.push(value.clone());
        }
        args.push(Value::from(id));

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? AND deleted_at IS NULL",
            T::TABLE,
            sets.join(", ")
        );
        Statement::new(sql, args)
    }

    fn delete_statement<T: Entity>(ids: &[u64]) -> Statement {
        let now = Utc::now();
        let mut args = vec![Value::Time(now), Value::Time(now)];
        args.extend(ids.iter().map(|id| Value::from(*id)));

        let sql = format!(
            "UPDATE {} SET deleted_at = ?, updated_at = ? WHERE id IN ({}) AND deleted_at IS NULL",
            T::TABLE,
            in_marks(ids.len())
        );
        Statement::new(sql, args)
    }
}

fn in_marks(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(column: &str, s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
}

fn row_id(id: i64) -> Result<u64, StorageError> {
    u64::try_from(id).map_err(|_| StorageError::Decode {
        column: "id".to_string(),
        message: format!("negative row id {}", id),
    })
}

fn decode_row<T: Entity>(row: &SqliteRow) -> Result<T, StorageError> {
    let mut record = T::default();

    {
        let model = record.model_mut();
        model.id = row_id(row.try_get::<i64, _>("id")?)?;
        model.created_at = parse_datetime("created_at", &row.try_get::<String, _>("created_at")?)?;
        model.updated_at = parse_datetime("updated_at", &row.try_get::<String, _>("updated_at")?)?;
        model.deleted_at = row
            .try_get::<Option<String>, _>("deleted_at")?
            .map(|s| parse_datetime("deleted_at", &s))
            .transpose()?;
    }

    // Field types are taken from a default record.
    for (column, prototype) in T::default().fields() {
        let value = match prototype {
            Value::Int(_) | Value::Bool(_) => Value::from(row.try_get::<Option<i64>, _>(column)?),
            Value::Time(_) => row
                .try_get::<Option<String>, _>(column)?
                .map(|s| parse_datetime(column, &s))
                .transpose()?
                .into(),
            Value::Null | Value::Text(_) => Value::from(row.try_get::<Option<String>, _>(column)?),
        };
        record.apply(column, value)?;
    }

    Ok(record)
}

fn decode_rows<T: Entity>(rows: &[SqliteRow]) -> Result<Vec<T>, StorageError> {
    rows.iter().map(decode_row::<T>).collect()
}

#[async_trait]
impl<T: Entity> StorageBackend<T> for SqliteStorage {
    type Tx = Transaction<'static, Sqlite>;

    async fn insert(&self, record: &T) -> Result<u64, StorageError> {
        let statement = Self::insert_statement(record);
        let result = statement.query().execute(&self.pool).await?;
        row_id(result.last_insert_rowid())
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<T>, StorageError> {
        let statement = Statement::new(Self::select::<T>("id = ?"), vec![Value::from(id)]);
        let row = statement.query().fetch_optional(&self.pool).await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn find_by_ids(&self, ids: &[u64]) -> Result<Vec<T>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let condition = format!("id IN ({})", in_marks(ids.len()));
        let statement = Statement::new(
            Self::select::<T>(&condition),
            ids.iter().map(|id| Value::from(*id)).collect(),
        );
        let rows = statement.query().fetch_all(&self.pool).await?;
        decode_rows(&rows)
    }

    async fn find_first(&self, filter: &Filter) -> Result<Option<T>, StorageError> {
        let (condition, args) = filter.to_sql();
        let sql = format!("{} ORDER BY id ASC LIMIT 1", Self::select::<T>(&condition));
        let row = Statement::new(sql, args)
            .query()
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn count(&self, filter: &Filter) -> Result<i64, StorageError> {
        let (condition, args) = filter.to_sql();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL AND ({})",
            T::TABLE,
            condition
        );
        let row = Statement::new(sql, args)
            .query()
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn find_page(&self, filter: &Filter, page: &Page) -> Result<Vec<T>, StorageError> {
        let (condition, mut args) = filter.to_sql();
        let sql = format!(
            "{} ORDER BY {} LIMIT ? OFFSET ?",
            Self::select::<T>(&condition),
            page.order_by()
        );
        args.push(Value::Int(i64::from(page.limit())));
        args.push(Value::from(page.offset()));

        let rows = Statement::new(sql, args)
            .query()
            .fetch_all(&self.pool)
            .await?;
        decode_rows(&rows)
    }

    async fn update_columns(
        &self,
        id: u64,
        patch: &[(&'static str, Value)],
    ) -> Result<u64, StorageError> {
        let statement = Self::update_statement::<T>(id, patch);
        Ok(statement.query().execute(&self.pool).await?.rows_affected())
    }

    async fn soft_delete(&self, ids: &[u64]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let statement = Self::delete_statement::<T>(ids);
        Ok(statement.query().execute(&self.pool).await?.rows_affected())
    }

    async fn begin(&self) -> Result<Self::Tx, StorageError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StorageError> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StorageError> {
        Ok(tx.rollback().await?)
    }

    async fn insert_in(&self, tx: &mut Self::Tx, record: &T) -> Result<u64, StorageError> {
        let statement = Self::insert_statement(record);
        let result = statement.query().execute(&mut **tx).await?;
        row_id(result.last_insert_rowid())
    }

    async fn update_in(
        &self,
        tx: &mut Self::Tx,
        id: u64,
        patch: &[(&'static str, Value)],
    ) -> Result<u64, StorageError> {
        let statement = Self::update_statement::<T>(id, patch);
        Ok(statement.query().execute(&mut **tx).await?.rows_affected())
    }

    async fn soft_delete_in(&self, tx: &mut Self::Tx, ids: &[u64]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let statement = Self::delete_statement::<T>(ids);
        Ok(statement.query().execute(&mut **tx).await?.rows_affected())
    }
}
