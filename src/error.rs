//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::ledger::LedgerError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Unknown caller identity: {0}")]
    UnknownUser(Uuid),

    #[error("Permission denied")]
    PermissionDenied,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }
            AppError::InvalidHeader(header) => {
                (StatusCode::BAD_REQUEST, "invalid_header", Some(header.clone()))
            }

            // 401 Unauthorized
            AppError::UnknownUser(guid) => {
                (StatusCode::UNAUTHORIZED, "unknown_user", Some(guid.to_string()))
            }

            // 403 Forbidden
            AppError::PermissionDenied => (StatusCode::FORBIDDEN, "permission_denied", None),

            // Ledger errors map per variant
            AppError::Ledger(err) => match err {
                LedgerError::UserNotFound(guid) => {
                    (StatusCode::NOT_FOUND, "user_not_found", Some(guid.to_string()))
                }
                LedgerError::TaskNotFound(guid) => {
                    (StatusCode::NOT_FOUND, "task_not_found", Some(guid.to_string()))
                }
                LedgerError::TaskAlreadyDone(guid) => {
                    (StatusCode::CONFLICT, "task_already_done", Some(guid.to_string()))
                }
                LedgerError::NoEligibleAssignee => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "no_eligible_assignee", None)
                }
                LedgerError::Store(e) => {
                    tracing::error!("Database error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
                }
                LedgerError::Publish(e) => {
                    tracing::error!("Publish error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "publish_error", None)
                }
            },
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
