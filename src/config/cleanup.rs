//! Cleanup engine configuration.
//!
//! # Example
//!
//! ```toml
//! [cleanup]
//! default_batch_size = 5000
//! max_batch_size = 100000
//! batch_timeout_secs = 30
//! batch_delay_ms = 100
//! async_timeout_secs = 3600
//! task_retention_secs = 3600
//! timestamp_column = "created_at"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::is_safe_identifier;

/// Tuning for batched deletes and async task bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupConfig {
    /// Batch size used when a request omits it or sends zero.
    /// Default: 5000
    #[serde(default = "default_batch_size")]
    pub default_batch_size: i64,

    /// Largest batch size a request may ask for.
    /// Default: 100000
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: i64,

    /// Upper bound on a single batch delete, in seconds.
    /// Default: 30
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Pause between consecutive batches, in milliseconds.
    /// Default: 100
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Time budget for an asynchronous run, in seconds.
    /// Default: 3600 (1 hour)
    #[serde(default = "default_async_timeout_secs")]
    pub async_timeout_secs: u64,

    /// How long a finished async task stays visible to pollers, in seconds.
    /// Default: 3600 (1 hour)
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,

    /// Column compared against the cutoff.
    /// Default: "created_at"
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
            batch_timeout_secs: default_batch_timeout_secs(),
            batch_delay_ms: default_batch_delay_ms(),
            async_timeout_secs: default_async_timeout_secs(),
            task_retention_secs: default_task_retention_secs(),
            timestamp_column: default_timestamp_column(),
        }
    }
}

impl CleanupConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn async_timeout(&self) -> Duration {
        Duration::from_secs(self.async_timeout_secs)
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.default_batch_size <= 0 {
            return Err(ConfigError::Validation(
                "cleanup.default_batch_size must be positive".into(),
            ));
        }
        if self.max_batch_size < self.default_batch_size {
            return Err(ConfigError::Validation(
                "cleanup.max_batch_size cannot be smaller than cleanup.default_batch_size".into(),
            ));
        }
        if self.batch_timeout_secs == 0 || self.async_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "cleanup timeouts must be greater than zero".into(),
            ));
        }
        if !is_safe_identifier(&self.timestamp_column) {
            return Err(ConfigError::Validation(format!(
                "cleanup.timestamp_column '{}' is not a safe identifier",
                self.timestamp_column
            )));
        }
        Ok(())
    }
}

fn default_batch_size() -> i64 {
    5000
}

fn default_max_batch_size() -> i64 {
    100_000
}

fn default_batch_timeout_secs() -> u64 {
    30
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_async_timeout_secs() -> u64 {
    3600
}

fn default_task_retention_secs() -> u64 {
    3600
}

fn default_timestamp_column() -> String {
    "created_at".to_string()
}
