//! Error responses.
//!
//! Every failure leaves the API as `{message, ...}` with the status code the
//! client can act on; internal details are logged and never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use kestrel_auth::AuthzError;
use kestrel_infra::command_dispatcher::DispatchError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    /// Field-level input error.
    #[error("{message}")]
    Validation { field: String, message: String },

    /// Illegal state transition or broken business rule.
    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } | ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation { field, message } => {
                let mut errors = serde_json::Map::new();
                errors.insert(field.clone(), json!([message]));
                json!({ "message": message, "errors": errors })
            }
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "request failed");
                json!({ "message": "internal server error" })
            }
            ApiError::Unauthenticated => json!({ "message": "unauthenticated" }),
            other => json!({ "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation { field, message } => ApiError::Validation {
                field: field.unwrap_or("request").to_string(),
                message,
            },
            DispatchError::InvariantViolation(msg) => ApiError::Unprocessable(msg),
            DispatchError::Concurrency(msg) | DispatchError::Conflict(msg) => ApiError::Conflict(msg),
            DispatchError::NotFound | DispatchError::TenantIsolation(_) => ApiError::NotFound,
            DispatchError::Unauthorized => ApiError::Forbidden("unauthorized".to_string()),
            e @ (DispatchError::Deserialize(_) | DispatchError::Store(_) | DispatchError::Publish(_)) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::TenantMismatch => ApiError::NotFound,
            AuthzError::Forbidden(_) => ApiError::Forbidden(err.to_string()),
        }
    }
}
