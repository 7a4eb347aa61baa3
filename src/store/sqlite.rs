//! Counter store backed by SQLite.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::sql::{Dialect, Statements};
use crate::error::StoreError;
use crate::ratelimit::{CounterRow, CounterStore, LimiterOptions, UpsertRequest};

/// A counter store holding one row per key in a SQLite table.
///
/// SQLite serializes writers per database file, which makes each consume
/// upsert atomic for every process opening the same file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    statements: Statements,
}

impl SqliteStore {
    /// Create a store over an existing pool.
    pub fn new(pool: SqlitePool, table: &str) -> Self {
        Self {
            pool,
            statements: Statements::new(Dialect::Sqlite, table, None),
        }
    }

    /// Create a store for the table named by `options`.
    ///
    /// `schema_name` does not apply to SQLite and is ignored.
    pub fn from_options(pool: SqlitePool, options: &LimiterOptions) -> Self {
        Self::new(pool, &options.table_name)
    }

    /// Connect a new pool to `url` and create a store over it.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        options: &LimiterOptions,
    ) -> Result<Self, StoreError> {
        info!(max_connections, table = %options.table_name, "Opening SQLite database");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self::from_options(pool, options))
    }

    /// Create a store over a private in-memory database.
    ///
    /// The pool is pinned to one connection that never recycles, since each
    /// SQLite connection to `:memory:` sees its own database.
    pub async fn in_memory(options: &LimiterOptions) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self::from_options(pool, options))
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn ensure_table(&self) -> Result<(), StoreError> {
        sqlx::query(&self.statements.create_table)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert(&self, request: &UpsertRequest<'_>) -> Result<CounterRow, StoreError> {
        let (points, expire): (i64, Option<i64>) = sqlx::query_as(&self.statements.upsert)
            .bind(request.key)
            .bind(request.points)
            .bind(request.expire_for_fresh_window())
            .bind(request.now)
            .bind(request.block_expire)
            .bind(request.max_points)
            .fetch_one(&self.pool)
            .await?;

        Ok(CounterRow::new(points, expire))
    }

    async fn force_set(
        &self,
        key: &str,
        points: i64,
        expire: Option<i64>,
    ) -> Result<CounterRow, StoreError> {
        let (points, expire): (i64, Option<i64>) = sqlx::query_as(&self.statements.force_set)
            .bind(key)
            .bind(points)
            .bind(expire)
            .fetch_one(&self.pool)
            .await?;

        Ok(CounterRow::new(points, expire))
    }

    async fn fetch(&self, key: &str, now: i64) -> Result<Option<CounterRow>, StoreError> {
        let row: Option<(i64, Option<i64>)> = sqlx::query_as(&self.statements.fetch)
            .bind(key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(points, expire)| CounterRow::new(points, expire)))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(&self.statements.delete)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_expired(&self, before: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(&self.statements.clear_expired)
            .bind(before)
            .execute(&self.pool)
            .await?;

        debug!(removed = result.rows_affected(), "Cleared expired rows");
        Ok(result.rows_affected())
    }
}
