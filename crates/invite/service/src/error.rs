//! Error types for invite-service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use invite_core::{InviteError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bootstrap and CLI errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invite error: {0}")]
    Core(#[from] InviteError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ServiceError {
    fn from(err: config::ConfigError) -> Self {
        ServiceError::Config(err.to_string())
    }
}

/// HTTP-facing errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Signature rejected: {0}")]
    Signature(String),

    #[error("{0}")]
    Invite(#[from] InviteError),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_PARAMS"),
            ApiError::Signature(_) => (StatusCode::UNAUTHORIZED, "SIGNATURE_REJECTED"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            ApiError::Invite(err) => match err {
                InviteError::AlreadyBound(_) => (StatusCode::CONFLICT, "CODE_ALREADY_BOUND"),
                InviteError::OwnerAlreadyBound(_) => (StatusCode::CONFLICT, "USER_ALREADY_BOUND"),
                InviteError::TypeMismatch { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "CODE_TYPE_MISMATCH")
                }
                InviteError::NotFound(_) => (StatusCode::NOT_FOUND, "CODE_NOT_FOUND"),
                InviteError::InsufficientPool { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "CODES_EXHAUSTED")
                }
                InviteError::TaskIncomplete(_) => (StatusCode::FORBIDDEN, "TASKS_INCOMPLETE"),
                InviteError::IdentityIncomplete(_) => {
                    (StatusCode::FORBIDDEN, "IDENTITY_INCOMPLETE")
                }
                InviteError::InvalidOwner(_) | InviteError::InvalidTarget { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_PARAMS")
                }
                InviteError::DuplicateCode(_)
                | InviteError::Generator(_)
                | InviteError::Provider(_)
                | InviteError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal detail stays in the log.
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let details = match &self {
            ApiError::Invite(InviteError::InsufficientPool { needed, available }) => {
                Some(serde_json::json!({ "needed": needed, "available": available }))
            }
            _ => None,
        };

        let body = ErrorResponse {
            error,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use invite_core::CodeType;

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn conflicts_map_to_409() {
        assert_eq!(
            status(InviteError::AlreadyBound("ABC12345".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(InviteError::OwnerAlreadyBound("wallet_address=0x1".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn caller_errors_are_not_internal() {
        assert_eq!(
            status(InviteError::TypeMismatch {
                code: "TASK0001".into(),
                actual: CodeType::Task,
                expected: vec![CodeType::Direct],
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(InviteError::NotFound("invite code X".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(InviteError::TaskIncomplete("1 of 2".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(ApiError::Signature("expired".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(ApiError::BadRequest("missing".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn exhaustion_is_retryable_and_storage_is_internal() {
        assert_eq!(
            status(InviteError::InsufficientPool {
                needed: 1,
                available: 0
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(InviteError::Storage("connection reset".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
