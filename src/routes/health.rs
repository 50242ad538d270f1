//! Health check endpoints for Kubernetes probes and monitoring.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

/// Detailed health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" or "unhealthy"
    pub status: String,
    pub version: String,
    pub subsystems: SubsystemStatus,
}

#[derive(Debug, Serialize)]
pub struct SubsystemStatus {
    /// Absent when the service runs without a database handle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentStatus>,
    pub tasks: TaskStatus,
}

/// Status of a single component.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Async cleanup task bookkeeping.
#[derive(Debug, Serialize)]
pub struct TaskStatus {
    /// Records currently held by the task registry, finished ones included.
    pub tracked: usize,
    /// Background runs that have not returned yet.
    pub running: usize,
}

/// Full health check with subsystem status.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut overall_healthy = true;
    let mut database = None;

    if let Some(db) = &state.db {
        let start = std::time::Instant::now();
        let result = db.health_check().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let message = match &result {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Database health check failed");
                overall_healthy = false;
                Some("Database connection failed".to_string())
            }
        };

        database = Some(ComponentStatus {
            healthy: result.is_ok(),
            message,
            latency_ms: Some(latency_ms),
        });
    }

    let health = HealthStatus {
        status: if overall_healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subsystems: SubsystemStatus {
            database,
            tasks: TaskStatus {
                tracked: state.registry().len(),
                running: state.task_tracker.len(),
            },
        },
    };

    let status_code = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Kubernetes liveness probe. Always 200 while the process is serving.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Kubernetes readiness probe.
///
/// Returns 503 while the database is unreachable.
#[tracing::instrument(name = "health.readiness", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(db) = &state.db
        && db.health_check().await.is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::OK
}

/// Prometheus metrics endpoint.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        match get_prometheus_handle() {
            Some(handle) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            ),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        }
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
