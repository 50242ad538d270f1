use axum::{
    Json,
    extract::rejection::JsonRejection,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::services::{CleanupError, ErrorKind};

/// Standard error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

/// `{"error": {"type": "...", "message": "...", "code": "...", "request_id": "..."}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub code: Option<String>,
    /// Populated by the request ID middleware.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Uses "invalid_request_error" as the error type.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_type("invalid_request_error", code, message)
    }

    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
                code: Some(code.into()),
                request_id: None,
            },
        }
    }
}

/// Error response for API requests.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = if self.status.is_server_error() {
            ErrorResponse::with_type("server_error", self.code, self.message)
        } else {
            ErrorResponse::new(self.code, self.message)
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CleanupError> for ApiError {
    fn from(err: CleanupError) -> Self {
        let status = match err.kind() {
            ErrorKind::Domain => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Contention => StatusCode::CONFLICT,
            ErrorKind::Infrastructure => {
                tracing::error!(error = %err, "Cleanup infrastructure error");
                return Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred",
                );
            }
        };

        let code = match &err {
            CleanupError::Validation(_) => "validation_error",
            CleanupError::InvalidIdentifier(_) => "invalid_identifier",
            CleanupError::TableNotFound(_) => "table_not_found",
            CleanupError::TaskNotFound(_) => "task_not_found",
            CleanupError::AlreadyRunning(_) => "cleanup_in_progress",
            CleanupError::Database(_) | CleanupError::Timeout(_) => "internal_error",
        };

        Self::new(status, code, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            rejection.body_text(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::db::DbError;

    #[rstest]
    #[case::validation(CleanupError::Validation("batch size must be positive".into()), StatusCode::BAD_REQUEST, "validation_error")]
    #[case::identifier(CleanupError::InvalidIdentifier("a;b".into()), StatusCode::BAD_REQUEST, "invalid_identifier")]
    #[case::table(CleanupError::TableNotFound("ghosts".into()), StatusCode::NOT_FOUND, "table_not_found")]
    #[case::task(CleanupError::TaskNotFound("abc".into()), StatusCode::NOT_FOUND, "task_not_found")]
    #[case::contention(CleanupError::AlreadyRunning("events".into()), StatusCode::CONFLICT, "cleanup_in_progress")]
    #[case::timeout(CleanupError::Timeout(Duration::from_secs(30)), StatusCode::INTERNAL_SERVER_ERROR, "internal_error")]
    fn test_status_mapping(
        #[case] err: CleanupError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        let api = ApiError::from(err);
        assert_eq!(api.status(), status);
        assert_eq!(api.code, code);
    }

    #[test]
    fn test_infrastructure_details_hidden() {
        let err = CleanupError::Database(DbError::Sqlx(sqlx::Error::PoolTimedOut));
        let api = ApiError::from(err);
        assert_eq!(api.message, "An internal error occurred");
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::new(StatusCode::CONFLICT, "cleanup_in_progress", "busy").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(json["error"]["code"], "cleanup_in_progress");
        assert_eq!(json["error"]["message"], "busy");
    }
}
