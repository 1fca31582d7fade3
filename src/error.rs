/**
 * DOMAIN LAYER - Error Handling
 *
 * AppError: the diplomat of failures - translating ledger problems into
 * HTTP responses and operator-facing detail.
 *
 * Architecture Layer: Domain (Layer 4)
 * Dependencies: None (pure domain logic)
 *
 * The four domain-level kinds from the spec (validation, business-rule,
 * gateway, invariant) get their own variants rather than one generic
 * "BusinessError" so callers can match on what actually failed
 * (duplicate booking vs. stale price vs. seats exhausted).
 */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Every way a ledger workflow can fail.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Business-rule violation: cancelled trip, booking window closed,
    /// duplicate ticket, seats exhausted, multi-company attempt,
    /// all-or-nothing refund violation, stale price, not-found entity
    /// during a refund. Recoverable by the caller.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Gateway declined or a network failure. The enclosing DB
    /// transaction is rolled back; an in-band record is written to the
    /// Payment row describing the error for operator triage.
    #[error("charge failed: {0}")]
    Charge(String),

    /// Invariant violation (zero-sum failed, missing expected item).
    /// Fatal; logged and surfaced as 5xx.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn price_changed(expected: rust_decimal::Decimal, actual: rust_decimal::Decimal) -> Self {
        AppError::Transaction(format!("priceChanged: expected {}, computed {}", expected, actual))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Unauthorized".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", "Forbidden".to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Transaction(msg) => (StatusCode::CONFLICT, "TRANSACTION_ERROR", msg.clone()),
            AppError::Charge(msg) => (StatusCode::PAYMENT_REQUIRED, "CHARGE_FAILED", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
            }
            AppError::Database(err) => {
                tracing::error!("database error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
            }
        };

        let body = ErrorBody {
            status: "error",
            error: ErrorDetail { code: code.to_string(), message },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
