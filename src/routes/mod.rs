pub mod cleanup;
mod error;
pub mod health;

use axum::{
    Router,
    routing::{get, post},
};
pub use error::*;

use crate::AppState;

/// Routes under `/api/v1/cleanup`.
pub fn cleanup_routes() -> Router<AppState> {
    Router::new()
        .route(
            cleanup::CLEANUP_PATH,
            post(cleanup::run_cleanup).get(cleanup::list_tasks),
        )
        .route("/api/v1/cleanup/async", post(cleanup::submit_cleanup))
        .route(
            "/api/v1/cleanup/{task_id}",
            get(cleanup::get_task).delete(cleanup::cancel_task),
        )
}
