//! Cleanup endpoints: synchronous runs, async submission, polling and cancellation.

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;

use super::ApiError;
use crate::{
    AppState,
    models::{CleanupRequestBody, CleanupResult, CleanupStatus},
};

/// Base path of the cleanup API.
pub const CLEANUP_PATH: &str = "/api/v1/cleanup";

/// Body message for a failed synchronous run.
const FAILED_RUN_MESSAGE: &str = "cleanup failed before completion; rows already deleted are reported";

/// Response for an accepted async cleanup.
#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: String,
    pub status: CleanupStatus,
    pub status_url: String,
}

/// A task record together with its ID.
#[derive(Debug, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    #[serde(flatten)]
    pub result: CleanupResult,
}

#[derive(Debug, Serialize)]
pub struct TaskList {
    pub data: Vec<TaskSnapshot>,
}

/// Run a cleanup and wait for it to finish.
///
/// Completed and canceled runs answer 200, failed runs 500; both carry the
/// result body with the rows removed before the run stopped. A failed run's
/// `error_message` is replaced with a generic one.
#[tracing::instrument(name = "cleanup.run", skip_all)]
pub async fn run_cleanup(
    State(state): State<AppState>,
    payload: Result<Json<CleanupRequestBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let request = body.into_request(state.config.cleanup.default_batch_size);
    let budget = Duration::from_secs(state.config.server.request_timeout_secs);

    let mut result = state
        .cleanup
        .run(&request, state.dispatcher.child_token(), budget)
        .await?;

    if result.status != CleanupStatus::Failed {
        return Ok(Json(result).into_response());
    }

    // The engine has already logged the underlying error.
    result.error_message = Some(FAILED_RUN_MESSAGE.to_string());
    Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(result)).into_response())
}

/// Start a cleanup in the background and return its task ID.
#[tracing::instrument(name = "cleanup.submit", skip_all)]
pub async fn submit_cleanup(
    State(state): State<AppState>,
    payload: Result<Json<CleanupRequestBody>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskAccepted>), ApiError> {
    let Json(body) = payload?;
    let request = body.into_request(state.config.cleanup.default_batch_size);

    let task_id = state.dispatcher.submit(request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            status_url: format!("{CLEANUP_PATH}/{task_id}"),
            task_id,
            status: CleanupStatus::Pending,
        }),
    ))
}

#[tracing::instrument(name = "cleanup.get", skip(state))]
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let result = state.registry().get(&task_id)?;
    Ok(Json(TaskSnapshot { task_id, result }))
}

#[tracing::instrument(name = "cleanup.list", skip(state))]
pub async fn list_tasks(State(state): State<AppState>) -> Json<TaskList> {
    let data = state
        .registry()
        .list()
        .into_iter()
        .map(|(task_id, result)| TaskSnapshot { task_id, result })
        .collect();
    Json(TaskList { data })
}

/// Request cancellation of an async task.
///
/// The returned snapshot is taken before the run notices the request, so it
/// may still show `in_progress`.
#[tracing::instrument(name = "cleanup.cancel", skip(state))]
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let result = state.dispatcher.cancel(&task_id)?;
    Ok(Json(TaskSnapshot { task_id, result }))
}
