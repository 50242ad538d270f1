use std::{sync::Arc, time::Duration};

use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use validator::{Validate, ValidationErrors};

use crate::{
    config::CleanupConfig,
    db::{CleanupRepo, DbError},
    models::{CleanupRequest, CleanupResult, CleanupStatus},
    observability::metrics,
};

/// Broad classification of a [`CleanupError`], used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller sent something unusable.
    Domain,
    /// The table or task does not exist.
    NotFound,
    /// Another run holds the table lock.
    Contention,
    /// The database or the runtime failed.
    Infrastructure,
}

/// Errors that can occur during cleanup operations.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid table name: {0}")]
    InvalidIdentifier(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("another process is already cleaning table {0}")]
    AlreadyRunning(String),

    #[error("task with ID {0} not found")]
    TaskNotFound(String),

    #[error("Database error: {0}")]
    Database(#[source] DbError),

    #[error("batch delete timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl CleanupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CleanupError::Validation(_) | CleanupError::InvalidIdentifier(_) => ErrorKind::Domain,
            CleanupError::TableNotFound(_) | CleanupError::TaskNotFound(_) => ErrorKind::NotFound,
            CleanupError::AlreadyRunning(_) => ErrorKind::Contention,
            CleanupError::Database(_) | CleanupError::Timeout(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<DbError> for CleanupError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::TableNotFound(table) => CleanupError::TableNotFound(table),
            DbError::InvalidIdentifier(name) => CleanupError::InvalidIdentifier(name),
            other => CleanupError::Database(other),
        }
    }
}

/// Fields are reported in declaration order so the first problem is stable.
const REQUEST_FIELDS: [&str; 3] = ["table_name", "before", "batch_size"];

fn first_validation_error(errors: &ValidationErrors, request: &CleanupRequest) -> CleanupError {
    let field_errors = errors.field_errors();
    for field in REQUEST_FIELDS {
        let Some(error) = field_errors.get(field).and_then(|errs| errs.first()) else {
            continue;
        };
        if error.code == "invalid_identifier" {
            return CleanupError::InvalidIdentifier(request.table_name.clone());
        }
        let message = error
            .message
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("invalid {field}"));
        return CleanupError::Validation(message);
    }
    CleanupError::Validation(errors.to_string())
}

/// How the batch loop ended.
enum LoopOutcome {
    Completed,
    Canceled,
    Failed(String),
}

/// Runs one lock-guarded, batched cleanup of a table.
pub struct CleanupService {
    repo: Arc<dyn CleanupRepo>,
    config: CleanupConfig,
}

impl CleanupService {
    pub fn new(repo: Arc<dyn CleanupRepo>, config: CleanupConfig) -> Self {
        Self { repo, config }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Check request shape and configured limits without touching the database.
    pub fn validate_request(&self, request: &CleanupRequest) -> Result<(), CleanupError> {
        request
            .validate()
            .map_err(|e| first_validation_error(&e, request))?;

        if request.batch_size > self.config.max_batch_size {
            return Err(CleanupError::Validation(format!(
                "batch size cannot exceed {}",
                self.config.max_batch_size
            )));
        }
        Ok(())
    }

    /// Run a cleanup to completion, cancellation or failure.
    ///
    /// See [`CleanupService::run_with_progress`].
    pub async fn run(
        &self,
        request: &CleanupRequest,
        cancel: CancellationToken,
        budget: Duration,
    ) -> Result<CleanupResult, CleanupError> {
        self.run_with_progress(request, cancel, budget, |_| {}).await
    }

    /// Run a cleanup, reporting the running total after every batch.
    ///
    /// Errors raised before the first batch (validation, missing table, lock
    /// contention) are returned as `Err`. Once deleting has started the run
    /// always yields `Ok` with a terminal status; a failed batch is reported
    /// through `status` and `error_message` together with the rows already
    /// removed.
    ///
    /// `cancel` and `budget` are only checked between batches, so an
    /// in-flight batch always finishes or times out on its own.
    pub async fn run_with_progress<F>(
        &self,
        request: &CleanupRequest,
        cancel: CancellationToken,
        budget: Duration,
        on_progress: F,
    ) -> Result<CleanupResult, CleanupError>
    where
        F: Fn(u64) + Send + Sync,
    {
        let started = Instant::now();
        let started_at = Utc::now();
        // A budget too large to represent never expires.
        let deadline = started.checked_add(budget);
        let table = request.table_name.as_str();

        self.validate_request(request)?;
        self.repo.validate_table(table).await?;

        let Some(lock) = self.repo.try_acquire_lock(table).await? else {
            metrics::record_lock_contention(table);
            tracing::info!(table, "Cleanup skipped, table is locked by another run");
            return Err(CleanupError::AlreadyRunning(table.to_string()));
        };

        tracing::info!(
            table,
            before_date = %request.before,
            batch_size = request.batch_size,
            lock_key = lock.key(),
            "Starting data cleanup"
        );

        let mut total_deleted = 0u64;
        let outcome = self
            .delete_batches(request, &cancel, deadline, &mut total_deleted, &on_progress)
            .await;

        lock.release().await;

        let elapsed = started.elapsed();
        let (status, error_message) = match outcome {
            LoopOutcome::Completed => {
                tracing::info!(
                    table,
                    total_deleted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Cleanup completed"
                );
                (CleanupStatus::Completed, None)
            }
            LoopOutcome::Canceled => {
                tracing::warn!(
                    table,
                    total_deleted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Cleanup canceled"
                );
                (
                    CleanupStatus::Canceled,
                    Some("cleanup canceled before completion".to_string()),
                )
            }
            LoopOutcome::Failed(message) => {
                tracing::error!(table, total_deleted, error = %message, "Cleanup failed");
                (CleanupStatus::Failed, Some(message))
            }
        };

        metrics::record_cleanup_run(table, status);

        Ok(CleanupResult {
            table_name: request.table_name.clone(),
            rows_deleted: total_deleted,
            status,
            elapsed_ms: elapsed.as_millis() as u64,
            error_message,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        })
    }

    async fn delete_batches<F>(
        &self,
        request: &CleanupRequest,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        total_deleted: &mut u64,
        on_progress: &F,
    ) -> LoopOutcome
    where
        F: Fn(u64) + Send + Sync,
    {
        let table = request.table_name.as_str();
        let batch_size = request.batch_size as u64;
        let batch_timeout = self.config.batch_timeout();

        loop {
            let batch_started = Instant::now();
            let batch = tokio::time::timeout(
                batch_timeout,
                self.repo
                    .delete_batch(table, request.before, request.batch_size),
            )
            .await;

            let deleted = match batch {
                Ok(Ok(deleted)) => deleted,
                Ok(Err(e)) => {
                    tracing::error!(table, error = %e, "Error deleting batch");
                    return LoopOutcome::Failed(CleanupError::from(e).to_string());
                }
                Err(_) => {
                    let e = CleanupError::Timeout(batch_timeout);
                    tracing::error!(table, error = %e, "Error deleting batch");
                    return LoopOutcome::Failed(e.to_string());
                }
            };

            metrics::record_batch_duration(table, batch_started.elapsed().as_secs_f64());
            metrics::record_rows_deleted(table, deleted);
            *total_deleted += deleted;
            on_progress(*total_deleted);

            tracing::debug!(
                table,
                deleted,
                total_deleted = *total_deleted,
                "Batch deleted"
            );

            if deleted < batch_size {
                return LoopOutcome::Completed;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return LoopOutcome::Canceled,
                _ = sleep_until_deadline(deadline) => return LoopOutcome::Canceled,
                _ = tokio::time::sleep(self.config.batch_delay()) => {}
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
