use std::{sync::Arc, time::Duration};

use dashmap::DashMap;

use crate::{models::CleanupResult, observability::metrics, services::CleanupError};

/// In-memory store of async cleanup tasks, keyed by task ID.
///
/// Cloning is cheap and every clone sees the same records. Reads always
/// return a snapshot, never a live reference.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<String, CleanupResult>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task_id: impl Into<String>, result: CleanupResult) {
        self.tasks.insert(task_id.into(), result);
        metrics::set_tracked_tasks(self.tasks.len());
    }

    /// Apply `f` to a record in place.
    ///
    /// Records that already reached a terminal status are left untouched.
    /// Returns `false` when the task is unknown or already finished.
    pub fn update(&self, task_id: &str, f: impl FnOnce(&mut CleanupResult)) -> bool {
        let Some(mut entry) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if entry.status.is_terminal() {
            return false;
        }
        f(entry.value_mut());
        true
    }

    pub fn get(&self, task_id: &str) -> Result<CleanupResult, CleanupError> {
        self.tasks
            .get(task_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CleanupError::TaskNotFound(task_id.to_string()))
    }

    /// Snapshots of every tracked task, oldest start first.
    pub fn list(&self) -> Vec<(String, CleanupResult)> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        tasks.sort_by(|a, b| a.1.started_at.cmp(&b.1.started_at).then(a.0.cmp(&b.0)));
        tasks
    }

    /// Removing an unknown task is a no-op.
    pub fn remove(&self, task_id: &str) -> Option<CleanupResult> {
        let removed = self.tasks.remove(task_id).map(|(_, result)| result);
        if removed.is_some() {
            metrics::set_tracked_tasks(self.tasks.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove the task once `retention` has elapsed.
    ///
    /// The timer is detached from any task tracker so shutdown does not wait
    /// for it.
    pub fn schedule_expiry(&self, task_id: String, retention: Duration) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if registry.remove(&task_id).is_some() {
                tracing::debug!(task_id = %task_id, "Expired cleanup task record");
            }
        });
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_count", &self.tasks.len())
            .finish()
    }
}
