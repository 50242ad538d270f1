use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::db::error::DbResult;

/// A held, session-scoped advisory lock on one table.
///
/// Call [`TableLock::release`] exactly once when the run ends. Implementations
/// must still free the lock if the value is dropped without being released,
/// for example when the owning future is cancelled.
#[async_trait]
pub trait TableLock: Send {
    /// The advisory lock key this capability holds.
    fn key(&self) -> i64;

    /// Release the lock. Failures are logged, never returned.
    async fn release(self: Box<Self>);
}

#[async_trait]
pub trait CleanupRepo: Send + Sync {
    /// Check that the table exists in the current schema.
    ///
    /// Returns `TableNotFound` if it does not. A missing index on the
    /// timestamp column only produces a warning.
    async fn validate_table(&self, table: &str) -> DbResult<()>;

    /// Try once, without blocking, to take the advisory lock for `table`.
    ///
    /// `Ok(None)` means another session holds it.
    async fn try_acquire_lock(&self, table: &str) -> DbResult<Option<Box<dyn TableLock>>>;

    /// Delete up to `limit` of the oldest rows older than `cutoff`.
    ///
    /// Runs in a single transaction and returns the exact number removed.
    async fn delete_batch(&self, table: &str, cutoff: DateTime<Utc>, limit: i64) -> DbResult<u64>;
}

/// Derive the advisory lock key for a table name.
///
/// The first 8 bytes of the SHA-256 digest, read as a big-endian `i64`.
pub fn lock_key(table: &str) -> i64 {
    let digest = Sha256::digest(table.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}
