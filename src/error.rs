use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::{CoordinateError, ParseError, UnknownVariant};

/// Domain-level failures returned by every core operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Illegal transition: {0}")]
    IllegalTransition(String),
    #[error("Slot full: {0}")]
    SlotFull(String),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Quote expired: {0}")]
    QuoteExpired(String),
    #[error("Quote mismatch: {0}")]
    QuoteMismatch(String),
    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),
    #[error("External service unavailable: {0}")]
    ExternalUnavailable(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::IllegalTransition(_) => "illegal_transition",
            CoreError::SlotFull(_) => "slot_full",
            CoreError::InsufficientBalance(_) => "insufficient_balance",
            CoreError::QuoteExpired(_) => "quote_expired",
            CoreError::QuoteMismatch(_) => "quote_mismatch",
            CoreError::PaymentVerificationFailed(_) => "payment_verification_failed",
            CoreError::ExternalUnavailable(_) => "external_unavailable",
            CoreError::Conflict(_) => "conflict",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Stable message shown to end users, independent of the detail string.
    pub fn user_message(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "The requested resource was not found",
            CoreError::InvalidInput(_) => "The request contains invalid data",
            CoreError::Unauthorized(_) => "You are not allowed to perform this action",
            CoreError::IllegalTransition(_) => "This action is not allowed in the current state",
            CoreError::SlotFull(_) => "slot no longer available",
            CoreError::InsufficientBalance(_) => "Insufficient wallet balance",
            CoreError::QuoteExpired(_) => "The quote has expired",
            CoreError::QuoteMismatch(_) => "The amount does not match the quote",
            CoreError::PaymentVerificationFailed(_) => "Payment verification failed",
            CoreError::ExternalUnavailable(_) => "A dependent service is unavailable, please retry",
            CoreError::Conflict(_) => "The resource already exists",
            CoreError::Internal(_) => "Internal server error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidInput(_) | CoreError::QuoteMismatch(_) => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized(_) => StatusCode::FORBIDDEN,
            CoreError::IllegalTransition(_) | CoreError::SlotFull(_) | CoreError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            CoreError::InsufficientBalance(_) => StatusCode::PAYMENT_REQUIRED,
            CoreError::QuoteExpired(_) => StatusCode::GONE,
            CoreError::PaymentVerificationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::ExternalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body shared by every error response.
    pub fn to_body(&self) -> serde_json::Value {
        let detail = match self {
            // Storage details never leak to clients.
            CoreError::Internal(_) => None,
            other => Some(other.to_string()),
        };
        json!({
            "error": self.user_message(),
            "code": self.code(),
            "detail": detail,
        })
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return CoreError::Conflict(db_err.message().to_string());
            }
        }
        CoreError::Internal(err.to_string())
    }
}

impl From<ParseError> for CoreError {
    fn from(err: ParseError) -> Self {
        CoreError::InvalidInput(err.to_string())
    }
}

impl From<CoordinateError> for CoreError {
    fn from(err: CoordinateError) -> Self {
        CoreError::InvalidInput(err.to_string())
    }
}

impl From<UnknownVariant> for CoreError {
    fn from(err: UnknownVariant) -> Self {
        CoreError::InvalidInput(err.to_string())
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        if matches!(self, CoreError::Internal(_)) {
            tracing::error!(error = %self, "Request failed with internal error");
        }
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_full_message_is_stable() {
        let err = CoreError::SlotFull("2025-03-15 14:00".into());
        assert_eq!(err.user_message(), "slot no longer available");
        assert_eq!(err.code(), "slot_full");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let body = CoreError::Internal("disk I/O error".into()).to_body();
        assert!(body["detail"].is_null());
        assert_eq!(body["code"], "internal");
    }

    #[test]
    fn test_parse_error_maps_to_invalid_input() {
        let err: CoreError = ParseError::Date("tomorrow".into()).into();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
