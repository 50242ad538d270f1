//! Prometheus metrics for cleanup runs.
//!
//! Provides metrics for:
//! - Rows deleted per table
//! - Run outcomes per table and status
//! - Advisory lock contention
//! - Batch delete latency

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::{config::MetricsConfig, models::CleanupStatus};

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record rows removed from a table by one batch.
pub fn record_rows_deleted(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("cleanup_rows_deleted_total", "table" => table.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record the duration of one batch delete.
pub fn record_batch_duration(table: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!("cleanup_batch_duration_seconds", "table" => table.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, duration_secs);
    }
}

/// Record a finished run with its terminal status.
pub fn record_cleanup_run(table: &str, status: CleanupStatus) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "cleanup_runs_total",
            "table" => table.to_string(),
            "status" => status.as_str()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, status);
    }
}

/// Record a run rejected because another session holds the table lock.
pub fn record_lock_contention(table: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("cleanup_lock_contention_total", "table" => table.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = table;
    }
}

/// Set the number of async tasks currently tracked by the registry.
pub fn set_tracked_tasks(count: usize) {
    #[cfg(feature = "prometheus")]
    {
        gauge!("cleanup_tracked_tasks").set(count as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = count;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
