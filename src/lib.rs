//! Batched, lock-coordinated deletion of stale rows from PostgreSQL tables.
//!
//! A cleanup run removes every row of one table whose timestamp column is
//! older than a cutoff, in bounded batches, while holding a Postgres advisory
//! lock keyed by the table name. Runs are started over HTTP, either
//! synchronously or as background tasks that can be polled and cancelled.

use std::sync::Arc;

use axum::{Router, routing::get};
use tokio_util::task::TaskTracker;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub mod config;
pub mod db;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;

use crate::{
    config::SweeperConfig,
    db::{CleanupRepo, DbError, DbPool},
    jobs::{CleanupDispatcher, TaskRegistry},
    services::CleanupService,
};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SweeperConfig>,
    /// `None` when the state was built around a bare repository.
    pub db: Option<Arc<DbPool>>,
    pub cleanup: Arc<CleanupService>,
    pub dispatcher: CleanupDispatcher,
    /// Async cleanup runs are spawned here so shutdown can wait for them.
    pub task_tracker: TaskTracker,
}

impl AppState {
    /// Connect to the configured database and wire up the cleanup components.
    pub async fn new(config: SweeperConfig) -> Result<Self, DbError> {
        let db = DbPool::from_config(&config.database, &config.cleanup.timestamp_column).await?;
        let db = Arc::new(db);
        let repo = db.cleanup();
        Ok(Self::with_repo(config, repo, Some(db)))
    }

    /// Build state around an existing repository.
    pub fn with_repo(
        config: SweeperConfig,
        repo: Arc<dyn CleanupRepo>,
        db: Option<Arc<DbPool>>,
    ) -> Self {
        let task_tracker = TaskTracker::new();
        let cleanup = Arc::new(CleanupService::new(repo, config.cleanup.clone()));
        let dispatcher =
            CleanupDispatcher::new(cleanup.clone(), TaskRegistry::new(), task_tracker.clone());

        Self {
            config: Arc::new(config),
            db,
            cleanup,
            dispatcher,
            task_tracker,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        self.dispatcher.registry()
    }
}

/// Build the HTTP application.
pub fn build_app(config: &SweeperConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness))
        .merge(routes::cleanup_routes());

    if config.observability.metrics.enabled {
        app = app.route(
            &config.observability.metrics.path,
            get(routes::health::metrics),
        );
    }

    app.layer(axum::middleware::from_fn(
        middleware::request_id_middleware,
    ))
    .layer(TraceLayer::new_for_http())
    .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
    .with_state(state)
}
