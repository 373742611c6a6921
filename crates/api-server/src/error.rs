//! HTTP error mapping.
//!
//! Core errors keep their snake_case code (`limit_breach`, `circuit_open`, ...)
//! so HTTP clients see the same codes as the action envelope.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    /// Whether the same request may succeed later.
    pub retryable: bool,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid JSON: {0}")]
    JsonRejection(String),

    /// The core refused the request; retrying unchanged will not help
    /// unless `retryable` says otherwise.
    #[error("{message}")]
    Rejected {
        code: &'static str,
        message: String,
        retryable: bool,
    },

    /// History, a collaborator or the account actor is not available yet.
    #[error("{message}")]
    Unavailable { code: &'static str, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::JsonRejection(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected { code, .. } if matches!(*code, "invalid_inputs" | "config_error") => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Rejected { .. } => StatusCode::CONFLICT,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::JsonRejection(_) => "invalid_json",
            ApiError::Rejected { code, .. } | ApiError::Unavailable { code, .. } => *code,
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Rejected { retryable, .. } => *retryable,
            ApiError::Unavailable { .. } => true,
            _ => false,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection, "JSON parsing failed");
        ApiError::JsonRejection(rejection.body_text())
    }
}

impl From<market_core::Error> for ApiError {
    fn from(err: market_core::Error) -> Self {
        use market_core::Error as CoreError;
        let code = err.code();
        match err {
            CoreError::NotFound(what) => ApiError::NotFound(what),
            e @ (CoreError::InsufficientHistory { .. }
            | CoreError::StaleData(_)
            | CoreError::ExecutionTimeout { .. }) => ApiError::Unavailable {
                code,
                message: e.to_string(),
            },
            e @ (CoreError::Json(_) | CoreError::Execution { .. }) => ApiError::Internal(e.to_string()),
            e => ApiError::Rejected {
                code,
                retryable: e.is_recoverable(),
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                error_code = self.error_code(),
                error = %self,
                "Internal server error"
            );
        }

        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::types::LimitType;

    #[test]
    fn test_core_errors_map_to_status() {
        let err: ApiError = market_core::Error::NotFound("signal".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = market_core::Error::LimitBreach {
            limit: LimitType::PositionSize,
            message: "too big".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "limit_breach");
        assert!(!err.is_retryable());

        let err: ApiError = market_core::Error::CircuitOpen {
            state: "triggered".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "circuit_open");
        assert!(err.is_retryable());

        let err: ApiError = market_core::Error::StaleData("feed".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_retryable());

        let err: ApiError = market_core::Error::InvalidInputs("capital".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_code(), "invalid_inputs");
    }
}
