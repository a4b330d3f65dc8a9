// src/error.rs

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// When set, internal error detail is echoed to clients (development mode only).
static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(false);

/// Toggles whether `Internal` error messages leak into response bodies.
pub fn expose_internal_details(enabled: bool) {
    EXPOSE_DETAILS.store(enabled, Ordering::Relaxed);
}

/// Why an authentication attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    TokenMissing,
    TokenInvalid,
    TokenExpired,
    InvalidCredentials,
}

impl AuthFailure {
    fn reason(self) -> &'static str {
        match self {
            Self::TokenMissing => "token_missing",
            Self::TokenInvalid => "token_invalid",
            Self::TokenExpired => "token_expired",
            Self::InvalidCredentials => "invalid_credentials",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::TokenMissing => "Access token required",
            Self::TokenInvalid => "Invalid token",
            Self::TokenExpired => "Token expired",
            Self::InvalidCredentials => "Invalid email or password",
        }
    }
}

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    // 400 Bad Request
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    WeakPassword(String),

    #[error("New password must be different from old password")]
    SamePassword,

    #[error("Invalid OTP")]
    InvalidOtp,

    #[error("OTP has expired")]
    OtpExpired,

    #[error("Invalid or expired reset token")]
    InvalidOrExpiredToken,

    #[error("Please verify your email before resetting password")]
    EmailNotVerified,

    // 401 Unauthorized
    #[error("{}", .0.message())]
    Unauthorized(AuthFailure),

    // 403 Forbidden
    #[error("{0}")]
    Forbidden(String),

    // 404 Not Found
    #[error("{0}")]
    NotFound(String),

    #[error("Product {0} not found")]
    ProductNotFound(i64),

    // 409 Conflict (e.g., duplicate email)
    #[error("{0}")]
    Conflict(String),

    #[error("Insufficient stock for {title}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        title: String,
        requested: i32,
        available: i32,
    },

    // 429 Too Many Requests
    #[error("Please wait {retry_after} seconds before requesting another reset")]
    RateLimited { retry_after: u64 },

    // 502 Bad Gateway
    #[error("{0}")]
    EmailDelivery(String),

    // 500, but the caller learns which saga will finish the job
    #[error("Cascade step failed after {completed:?}; saga {saga_id} will retry")]
    PartialCascade {
        saga_id: String,
        completed: Vec<String>,
        detail: String,
    },

    // 500 Internal Server Error
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-checkable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::WeakPassword(_) => "weak_password",
            Self::SamePassword => "same_password",
            Self::InvalidOtp => "invalid_otp",
            Self::OtpExpired => "otp_expired",
            Self::InvalidOrExpiredToken => "invalid_or_expired_token",
            Self::EmailNotVerified => "email_not_verified",
            Self::Unauthorized(failure) => failure.reason(),
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::ProductNotFound(_) => "product_not_found",
            Self::Conflict(_) => "conflict",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::RateLimited { .. } => "rate_limited",
            Self::EmailDelivery(_) => "email_delivery_failed",
            Self::PartialCascade { .. } => "partial_cascade_failure",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::WeakPassword(_)
            | Self::SamePassword
            | Self::InvalidOtp
            | Self::OtpExpired
            | Self::InvalidOrExpiredToken
            | Self::EmailNotVerified => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::ProductNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InsufficientStock { .. } => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::EmailDelivery(_) => StatusCode::BAD_GATEWAY,
            Self::PartialCascade { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let expose = EXPOSE_DETAILS.load(Ordering::Relaxed);

        let mut body = json!({
            "success": false,
            "reason": self.reason(),
        });

        match &self {
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                body["message"] = json!("Internal server error");
                if expose {
                    body["detail"] = json!(msg);
                }
            }
            AppError::PartialCascade {
                saga_id,
                completed,
                detail,
            } => {
                tracing::error!(%saga_id, ?completed, "Partial cascade failure: {}", detail);
                body["message"] =
                    json!("Product deletion is incomplete; it will be retried");
                body["sagaId"] = json!(saga_id);
                if expose {
                    body["detail"] = json!(detail);
                }
            }
            AppError::EmailDelivery(msg) => {
                tracing::warn!("Email delivery failed: {}", msg);
                body["message"] = json!("Failed to send email. Please try again later.");
                if expose {
                    body["detail"] = json!(msg);
                }
            }
            AppError::RateLimited { retry_after } => {
                body["message"] = json!(self.to_string());
                body["retryAfter"] = json!(retry_after);
            }
            other => {
                body["message"] = json!(other.to_string());
            }
        }

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Converts `sqlx::Error` into `AppError`.
/// Unique violations become `Conflict`, everything else is internal.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return AppError::Conflict(
                    db_err
                        .constraint()
                        .map(|c| format!("Duplicate value violates {}", c))
                        .unwrap_or_else(|| "Duplicate value".to_string()),
                );
            }
        }
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = AppError::RateLimited { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn auth_failures_keep_distinct_reasons() {
        let reasons: Vec<_> = [
            AuthFailure::TokenMissing,
            AuthFailure::TokenInvalid,
            AuthFailure::TokenExpired,
        ]
        .into_iter()
        .map(|f| AppError::Unauthorized(f).reason())
        .collect();
        assert_eq!(reasons, ["token_missing", "token_invalid", "token_expired"]);
    }

    #[test]
    fn stock_shortage_is_a_conflict() {
        let err = AppError::InsufficientStock {
            product_id: 7,
            title: "Lamp".into(),
            requested: 3,
            available: 2,
        };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.reason(), "insufficient_stock");
    }
}
