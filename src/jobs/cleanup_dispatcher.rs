use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use super::TaskRegistry;
use crate::{
    models::{CleanupRequest, CleanupResult, CleanupStatus},
    services::{CleanupError, CleanupService},
};

/// Starts cleanup runs in the background and records their progress in a
/// [`TaskRegistry`].
///
/// Runs are spawned on the shared [`TaskTracker`] so graceful shutdown waits
/// for them. Each run gets a child of the dispatcher's shutdown token, which
/// lets a single run be cancelled without affecting the others.
#[derive(Clone)]
pub struct CleanupDispatcher {
    service: Arc<CleanupService>,
    registry: TaskRegistry,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    tokens: Arc<DashMap<String, CancellationToken>>,
}

impl CleanupDispatcher {
    pub fn new(service: Arc<CleanupService>, registry: TaskRegistry, tracker: TaskTracker) -> Self {
        Self {
            service,
            registry,
            tracker,
            shutdown: CancellationToken::new(),
            tokens: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// A token that fires on [`CleanupDispatcher::shutdown`], for runs not
    /// started through the dispatcher.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Validate `request`, record it as pending and start it in the background.
    ///
    /// Returns the new task ID immediately. Validation errors are returned
    /// here and no task is created for them; everything else is reported
    /// through the task's record.
    pub fn submit(&self, request: CleanupRequest) -> Result<String, CleanupError> {
        self.service.validate_request(&request)?;

        let task_id = Uuid::new_v4().to_string();
        let token = self.shutdown.child_token();

        self.registry
            .insert(task_id.clone(), CleanupResult::pending(&request.table_name));
        self.tokens.insert(task_id.clone(), token.clone());

        tracing::info!(
            task_id = %task_id,
            table = %request.table_name,
            batch_size = request.batch_size,
            "Queued async cleanup"
        );

        let dispatcher = self.clone();
        let id = task_id.clone();
        self.tracker.spawn(async move {
            dispatcher.run_task(id, request, token).await;
        });

        Ok(task_id)
    }

    /// Ask a running task to stop after its current batch.
    ///
    /// Finished tasks are returned unchanged.
    pub fn cancel(&self, task_id: &str) -> Result<CleanupResult, CleanupError> {
        let snapshot = self.registry.get(task_id)?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }

        if let Some(token) = self.tokens.get(task_id) {
            token.cancel();
            tracing::info!(task_id = %task_id, table = %snapshot.table_name, "Cancellation requested");
        }

        Ok(snapshot)
    }

    /// Cancel every in-flight run.
    pub fn shutdown(&self) {
        let in_flight = self.tokens.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Cancelling in-flight cleanup tasks");
        }
        self.shutdown.cancel();
    }

    async fn run_task(&self, task_id: String, request: CleanupRequest, token: CancellationToken) {
        let started = Instant::now();
        let started_at = Utc::now();
        let config = self.service.config();

        let result = if token.is_cancelled() {
            CleanupResult {
                status: CleanupStatus::Canceled,
                error_message: Some("cleanup canceled before it started".to_string()),
                started_at: Some(started_at),
                finished_at: Some(Utc::now()),
                ..CleanupResult::pending(&request.table_name)
            }
        } else {
            self.registry.update(&task_id, |r| {
                r.status = CleanupStatus::InProgress;
                r.started_at = Some(started_at);
            });

            let progress = {
                let registry = self.registry.clone();
                let task_id = task_id.clone();
                move |total: u64| {
                    registry.update(&task_id, |r| r.rows_deleted = total);
                }
            };

            let run = self.service.run_with_progress(
                &request,
                token,
                config.async_timeout(),
                progress,
            );

            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::warn!(task_id = %task_id, table = %request.table_name, error = %e, "Async cleanup failed");
                    self.failed_result(&task_id, &request, e.to_string(), started, started_at)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(task_id = %task_id, table = %request.table_name, error = %message, "Async cleanup panicked");
                    self.failed_result(
                        &task_id,
                        &request,
                        format!("cleanup task panicked: {message}"),
                        started,
                        started_at,
                    )
                }
            }
        };

        tracing::info!(
            task_id = %task_id,
            table = %result.table_name,
            status = %result.status,
            rows_deleted = result.rows_deleted,
            "Async cleanup finished"
        );

        self.registry.update(&task_id, |r| *r = result);
        self.tokens.remove(&task_id);
        self.registry
            .schedule_expiry(task_id, config.task_retention());
    }

    /// Terminal record for a run that ended without a result of its own.
    ///
    /// Keeps the last total reported through progress, since those rows are
    /// already gone.
    fn failed_result(
        &self,
        task_id: &str,
        request: &CleanupRequest,
        message: String,
        started: Instant,
        started_at: chrono::DateTime<Utc>,
    ) -> CleanupResult {
        let rows_deleted = self
            .registry
            .get(task_id)
            .map_or(0, |record| record.rows_deleted);

        CleanupResult {
            table_name: request.table_name.clone(),
            rows_deleted,
            status: CleanupStatus::Failed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error_message: Some(message),
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for CleanupDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupDispatcher")
            .field("in_flight", &self.tokens.len())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Poll a task until it reaches a terminal status.
#[cfg(test)]
pub(crate) async fn wait_for_terminal(registry: &TaskRegistry, task_id: &str) -> CleanupResult {
    for _ in 0..100_000 {
        let snapshot = registry.get(task_id).unwrap();
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never finished");
}
