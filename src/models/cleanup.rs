use std::{borrow::Cow, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::validators::validate_identifier;

/// Lifecycle of a cleanup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl CleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStatus::Pending => "pending",
            CleanupStatus::InProgress => "in_progress",
            CleanupStatus::Completed => "completed",
            CleanupStatus::Failed => "failed",
            CleanupStatus::Canceled => "canceled",
        }
    }

    /// Terminal statuses never change once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CleanupStatus::Completed | CleanupStatus::Failed | CleanupStatus::Canceled
        )
    }
}

impl fmt::Display for CleanupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated description of one cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct CleanupRequest {
    #[validate(
        length(min = 1, message = "table name cannot be empty"),
        custom(function = "validate_identifier")
    )]
    pub table_name: String,

    /// Rows strictly older than this instant are deleted.
    #[validate(custom(function = "validate_cutoff"))]
    pub before: DateTime<Utc>,

    #[validate(range(min = 1, message = "batch size must be positive"))]
    pub batch_size: i64,
}

impl CleanupRequest {
    pub fn new(table_name: impl Into<String>, before: DateTime<Utc>, batch_size: i64) -> Self {
        Self {
            table_name: table_name.into(),
            before,
            batch_size,
        }
    }
}

/// The cutoff must be set, which for a concrete timestamp means after the epoch.
fn validate_cutoff(before: &DateTime<Utc>) -> Result<(), ValidationError> {
    if before.timestamp() > 0 {
        return Ok(());
    }
    let mut err = ValidationError::new("invalid_cutoff");
    err.message = Some(Cow::Borrowed("invalid date specified"));
    Err(err)
}

/// JSON body accepted by the cleanup endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupRequestBody {
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub before_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub batch_size: Option<i64>,
}

impl CleanupRequestBody {
    /// Apply defaults: a missing or zero batch size becomes `default_batch_size`,
    /// and a missing cutoff becomes the epoch so validation rejects it.
    pub fn into_request(self, default_batch_size: i64) -> CleanupRequest {
        let batch_size = match self.batch_size {
            None | Some(0) => default_batch_size,
            Some(n) => n,
        };
        CleanupRequest {
            table_name: self.table_name,
            before: self.before_date.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            batch_size,
        }
    }
}

/// Outcome (or in-flight progress) of a cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub table_name: String,
    pub rows_deleted: u64,
    pub status: CleanupStatus,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CleanupResult {
    pub fn pending(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            rows_deleted: 0,
            status: CleanupStatus::Pending,
            elapsed_ms: 0,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }
}
