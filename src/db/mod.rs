mod error;
pub mod postgres;
pub mod repos;

#[cfg(test)]
pub mod tests;

use std::{sync::Arc, time::Duration};

pub use error::{DbError, DbResult};
pub use repos::*;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
pub struct PgPoolPair {
    /// Primary pool for writes and advisory locks.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

impl PgPoolPair {
    /// Get the pool to use for read operations.
    pub fn read_pool(&self) -> &sqlx::PgPool {
        self.read.as_ref().unwrap_or(&self.write)
    }

    /// Get the pool to use for write operations.
    pub fn write_pool(&self) -> &sqlx::PgPool {
        &self.write
    }
}

/// Database handle owning the pools and the cleanup repository built on them.
pub struct DbPool {
    pools: PgPoolPair,
    cleanup: Arc<dyn CleanupRepo>,
}

impl DbPool {
    /// Create a DbPool from an existing pool.
    /// Primarily useful for testing.
    pub fn from_postgres(pool: sqlx::PgPool, timestamp_column: &str) -> Self {
        let cleanup = Arc::new(postgres::PostgresCleanupRepo::new(
            pool.clone(),
            None,
            timestamp_column,
        ));
        Self {
            pools: PgPoolPair {
                write: pool,
                read: None,
            },
            cleanup,
        }
    }

    /// Connect using the `[database]` configuration section.
    pub async fn from_config(config: &DatabaseConfig, timestamp_column: &str) -> DbResult<Self> {
        let write = pool_options(config).connect(&config.url).await?;

        let read = if let Some(read_url) = &config.read_url {
            tracing::info!("Configuring read replica pool");
            Some(pool_options(config).connect(read_url).await?)
        } else {
            None
        };

        let cleanup = Arc::new(postgres::PostgresCleanupRepo::new(
            write.clone(),
            read.clone(),
            timestamp_column,
        ));

        Ok(Self {
            pools: PgPoolPair { write, read },
            cleanup,
        })
    }

    pub fn pools(&self) -> &PgPoolPair {
        &self.pools
    }

    pub fn cleanup(&self) -> Arc<dyn CleanupRepo> {
        self.cleanup.clone()
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        // Check both write and read pools
        sqlx::query("SELECT 1").execute(&self.pools.write).await?;
        if let Some(read) = &self.pools.read {
            sqlx::query("SELECT 1").execute(read).await?;
        }
        Ok(())
    }

    /// Close every pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pools.write.close().await;
        if let Some(read) = &self.pools.read {
            read.close().await;
        }
    }
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
}
