use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, pool::PoolConnection};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{CleanupRepo, TableLock, lock_key},
    },
    models::is_safe_identifier,
};

pub struct PostgresCleanupRepo {
    write_pool: PgPool,
    read_pool: PgPool,
    timestamp_column: String,
}

impl PostgresCleanupRepo {
    pub fn new(
        write_pool: PgPool,
        read_pool: Option<PgPool>,
        timestamp_column: impl Into<String>,
    ) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
            timestamp_column: timestamp_column.into(),
        }
    }

    fn ensure_safe(name: &str) -> DbResult<()> {
        if is_safe_identifier(name) {
            Ok(())
        } else {
            Err(DbError::InvalidIdentifier(name.to_string()))
        }
    }

    /// Oldest-first batched delete keyed on `ctid`.
    ///
    /// `SKIP LOCKED` lets the statement step over rows held by concurrent
    /// writers instead of waiting on them.
    fn delete_batch_sql(&self, table: &str) -> String {
        let column = &self.timestamp_column;
        format!(
            r#"
            WITH doomed AS (
                SELECT ctid FROM "{table}"
                WHERE "{column}" < $1
                ORDER BY "{column}"
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM "{table}" AS t
            USING doomed
            WHERE t.ctid = doomed.ctid
            "#
        )
    }
}

#[async_trait]
impl CleanupRepo for PostgresCleanupRepo {
    async fn validate_table(&self, table: &str) -> DbResult<()> {
        Self::ensure_safe(table)?;

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema()
                  AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(&self.read_pool)
        .await?;

        if !exists {
            return Err(DbError::TableNotFound(table.to_string()));
        }

        let indexed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_indexes
                WHERE schemaname = current_schema()
                  AND tablename = $1
                  AND indexdef LIKE '%' || $2 || '%'
            )
            "#,
        )
        .bind(table)
        .bind(&self.timestamp_column)
        .fetch_one(&self.read_pool)
        .await?;

        if !indexed {
            tracing::warn!(
                table,
                column = %self.timestamp_column,
                "No index covers the timestamp column, batch deletes will scan the table"
            );
        }

        Ok(())
    }

    async fn try_acquire_lock(&self, table: &str) -> DbResult<Option<Box<dyn TableLock>>> {
        let key = lock_key(table);
        let mut conn = self.write_pool.acquire().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Ok(None);
        }

        tracing::debug!(table, lock_key = key, "Advisory lock acquired");
        Ok(Some(Box::new(PgAdvisoryLock {
            table: table.to_string(),
            key,
            conn: Some(conn),
        })))
    }

    async fn delete_batch(&self, table: &str, cutoff: DateTime<Utc>, limit: i64) -> DbResult<u64> {
        Self::ensure_safe(table)?;
        let query = self.delete_batch_sql(table);

        let mut tx = self.write_pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(&query)
            .bind(cutoff)
            .bind(limit)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected())
    }
}

/// Session advisory lock pinned to the pooled connection that took it.
///
/// Postgres advisory locks belong to the session, so unlocking has to happen
/// on the same connection. If the lock is dropped while still held, the
/// connection is detached from the pool and closed, which ends the session
/// and frees the lock.
struct PgAdvisoryLock {
    table: String,
    key: i64,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl TableLock for PgAdvisoryLock {
    fn key(&self) -> i64 {
        self.key
    }

    async fn release(self: Box<Self>) {
        let mut lock = self;
        let Some(conn) = lock.conn.as_mut() else {
            return;
        };

        // The connection stays inside the lock until the unlock completes, so
        // a cancelled release still ends up in `Drop`.
        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock.key)
            .fetch_one(&mut **conn)
            .await;

        match unlocked {
            Ok(true) => {
                tracing::debug!(table = %lock.table, lock_key = lock.key, "Advisory lock released");
                lock.conn.take();
            }
            Ok(false) => {
                tracing::warn!(
                    table = %lock.table,
                    lock_key = lock.key,
                    "Advisory lock was not held by this session at release"
                );
                lock.conn.take();
            }
            Err(e) => {
                tracing::error!(
                    table = %lock.table,
                    lock_key = lock.key,
                    error = %e,
                    "Failed to release advisory lock"
                );
            }
        }
    }
}

impl Drop for PgAdvisoryLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                table = %self.table,
                lock_key = self.key,
                "Advisory lock dropped without release, closing its connection"
            );
            drop(conn.detach());
        }
    }
}
