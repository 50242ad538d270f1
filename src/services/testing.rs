//! In-memory [`CleanupRepo`] used by engine, dispatcher and route tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{CleanupRepo, DbError, DbResult, TableLock, lock_key};

/// Rows are stored as bare timestamps; "deleting" drops the oldest ones.
#[derive(Default)]
pub struct InMemoryCleanupRepo {
    tables: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    locks: Arc<Mutex<HashSet<String>>>,
    batches: Mutex<Vec<u64>>,
    fail_on_batch: Mutex<Option<usize>>,
    panic_on_batch: Mutex<Option<usize>>,
    batch_latency: Mutex<Duration>,
    pub validate_calls: AtomicUsize,
    pub lock_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
}

impl InMemoryCleanupRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` holding `count` rows, all older than `cutoff`.
    pub fn with_stale_rows(self, table: &str, count: usize, cutoff: DateTime<Utc>) -> Self {
        let rows = (1..=count)
            .map(|i| cutoff - chrono::Duration::seconds(i as i64))
            .collect();
        self.tables.lock().unwrap().insert(table.to_string(), rows);
        self
    }

    /// Add rows at or after `cutoff` that must survive a cleanup.
    pub fn with_fresh_rows(self, table: &str, count: usize, cutoff: DateTime<Utc>) -> Self {
        {
            let mut tables = self.tables.lock().unwrap();
            let rows = tables.entry(table.to_string()).or_default();
            rows.extend((0..count).map(|i| cutoff + chrono::Duration::seconds(i as i64)));
        }
        self
    }

    /// Make the `n`th delete_batch call (1-based) fail.
    pub fn failing_on_batch(self, n: usize) -> Self {
        *self.fail_on_batch.lock().unwrap() = Some(n);
        self
    }

    /// Make the `n`th delete_batch call (1-based) panic.
    pub fn panicking_on_batch(self, n: usize) -> Self {
        *self.panic_on_batch.lock().unwrap() = Some(n);
        self
    }

    /// Make each delete_batch call take `latency` (observes tokio's clock).
    pub fn with_batch_latency(self, latency: Duration) -> Self {
        *self.batch_latency.lock().unwrap() = latency;
        self
    }

    pub fn remaining(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, |rows| rows.len())
    }

    pub fn batches(&self) -> Vec<u64> {
        self.batches.lock().unwrap().clone()
    }

    pub fn is_locked(&self, table: &str) -> bool {
        self.locks.lock().unwrap().contains(table)
    }
}

#[async_trait]
impl CleanupRepo for InMemoryCleanupRepo {
    async fn validate_table(&self, table: &str) -> DbResult<()> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if !crate::models::is_safe_identifier(table) {
            return Err(DbError::InvalidIdentifier(table.to_string()));
        }
        if self.tables.lock().unwrap().contains_key(table) {
            Ok(())
        } else {
            Err(DbError::TableNotFound(table.to_string()))
        }
    }

    async fn try_acquire_lock(&self, table: &str) -> DbResult<Option<Box<dyn TableLock>>> {
        self.lock_calls.fetch_add(1, Ordering::SeqCst);
        if !self.locks.lock().unwrap().insert(table.to_string()) {
            return Ok(None);
        }
        Ok(Some(Box::new(InMemoryLock {
            table: table.to_string(),
            locks: self.locks.clone(),
            releases: self.releases.clone(),
            held: true,
        })))
    }

    async fn delete_batch(&self, table: &str, cutoff: DateTime<Utc>, limit: i64) -> DbResult<u64> {
        let call = self.delete_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let latency = *self.batch_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if *self.panic_on_batch.lock().unwrap() == Some(call) {
            panic!("delete_batch exploded on call {call}");
        }

        if *self.fail_on_batch.lock().unwrap() == Some(call) {
            return Err(DbError::Sqlx(sqlx::Error::Protocol(
                "connection reset by peer".into(),
            )));
        }

        let mut tables = self.tables.lock().unwrap();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        rows.sort();
        let stale = rows.iter().take_while(|ts| **ts < cutoff).count();
        let deleted = stale.min(limit as usize);
        rows.drain(..deleted);

        self.batches.lock().unwrap().push(deleted as u64);
        Ok(deleted as u64)
    }
}

struct InMemoryLock {
    table: String,
    locks: Arc<Mutex<HashSet<String>>>,
    releases: Arc<AtomicUsize>,
    held: bool,
}

#[async_trait]
impl TableLock for InMemoryLock {
    fn key(&self) -> i64 {
        lock_key(&self.table)
    }

    async fn release(self: Box<Self>) {
        let mut lock = self;
        lock.held = false;
        lock.releases.fetch_add(1, Ordering::SeqCst);
        lock.locks.lock().unwrap().remove(&lock.table);
    }
}

impl Drop for InMemoryLock {
    fn drop(&mut self) {
        if self.held {
            self.locks.lock().unwrap().remove(&self.table);
        }
    }
}
