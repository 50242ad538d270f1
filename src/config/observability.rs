//! Logging and metrics settings.
//!
//! ```toml
//! [observability.logging]
//! level = "info"
//! format = "json"
//! filter = "sweeper=debug"
//!
//! [observability.metrics]
//! path = "/metrics"
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ObservabilityConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "observability.metrics.path must start with '/', got '{}'",
                self.metrics.path
            )));
        }
        if self.metrics.latency_buckets_ms.is_empty() {
            return Err(ConfigError::Validation(
                "observability.metrics.latency_buckets_ms cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

/// How cleanup logs are filtered and rendered.
///
/// `RUST_LOG`, when set, replaces both `level` and `filter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Annotate events with source file and line.
    #[serde(default)]
    pub file_line: bool,

    /// Attach the current span (request ID, method, path) to JSON events.
    #[serde(default = "default_true")]
    pub include_spans: bool,

    /// Extra `EnvFilter` directives appended to `level`,
    /// e.g. `"sweeper=debug,sqlx=info"`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            timestamps: true,
            file_line: false,
            include_spans: true,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The level as an `EnvFilter` directive.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, for local development.
    Pretty,
    #[default]
    Compact,
    /// One JSON object per event, for log shippers.
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and expose `path`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Buckets for `cleanup_batch_duration_seconds`, given in milliseconds.
    #[serde(default = "default_batch_buckets_ms")]
    pub latency_buckets_ms: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
            latency_buckets_ms: default_batch_buckets_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Batches are bounded by the 30 s batch timeout.
fn default_batch_buckets_ms() -> Vec<f64> {
    vec![
        5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.logging.timestamps);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.path, "/metrics");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relative_metrics_path_rejected_only_when_enabled() {
        let mut config = ObservabilityConfig::default();
        config.metrics.path = "metrics".into();
        assert!(config.validate().is_err());

        config.metrics.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_buckets_rejected() {
        let mut config = ObservabilityConfig::default();
        config.metrics.latency_buckets_ms.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_levels_and_formats() {
        let config: LoggingConfig = toml::from_str(
            r#"
            level = "warn"
            format = "pretty"
            file_line = true
        "#,
        )
        .unwrap();
        assert_eq!(config.level.as_directive(), "warn");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file_line);
    }
}
