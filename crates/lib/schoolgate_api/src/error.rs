//! Application error types.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use schoolgate_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid or expired token")]
    InvalidSideToken,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Account locked")]
    Locked { retry_after: Duration },

    #[error("Too many requests")]
    TooManyRequests { retry_after: Duration },

    #[error("Internal server error")]
    Internal(String),
}

/// Whole seconds for `Retry-After`, rounded up and at least one.
fn retry_after_secs(d: Duration) -> u64 {
    (d.as_secs() + u64::from(d.subsec_nanos() > 0)).max(1)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::InvalidSideToken => (
                StatusCode::BAD_REQUEST,
                "invalid_token",
                "Token not found or expired",
            ),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Invalid email or password",
            ),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::Locked { .. } => (
                StatusCode::LOCKED,
                "account_locked",
                "Account temporarily locked",
            ),
            AppError::TooManyRequests { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                "Too many attempts, try again later",
            ),
            AppError::Internal(detail) => {
                error!("internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        let mut response = (status, body).into_response();
        if let AppError::Locked { retry_after } | AppError::TooManyRequests { retry_after } = &self {
            response.headers_mut().insert(
                RETRY_AFTER,
                HeaderValue::from(retry_after_secs(*retry_after)),
            );
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MalformedToken
            | AuthError::ExpiredToken
            | AuthError::WrongTokenType
            | AuthError::RevokedToken
            | AuthError::StaleTokenVersion => AppError::Unauthorized(e.to_string()),
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            AuthError::AccountInactive => AppError::Forbidden("Account inactive".into()),
            AuthError::AccountLocked { retry_after } => AppError::Locked { retry_after },
            AuthError::BruteForceSuspected { retry_after } => {
                AppError::TooManyRequests { retry_after }
            }
            AuthError::SideTokenNotFoundOrExpired => AppError::InvalidSideToken,
            AuthError::EmailTaken => AppError::Conflict("Email already registered".into()),
            AuthError::WeakPassword(msg) => AppError::Validation(msg),
            AuthError::AccountNotFound => AppError::NotFound("Account not found".into()),
            AuthError::Store(e) => AppError::Internal(e.to_string()),
            AuthError::Config(msg) | AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}
