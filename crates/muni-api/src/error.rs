//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from muni-state and muni-core to HTTP status codes
//! with a JSON body `{"error": {"code", "message", "details"?}}`.
//! Internal error details are never returned to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use muni_core::{ReferenceError, ValidationError};
use muni_state::LedgerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::audit::AuditFailure;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "VALIDATION_ERROR").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed, including invalid payment amounts (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid token (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks the required authority (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Duplicate key or an operation the record's state forbids (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Shorthand for a missing record of the given kind.
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{entity} {id} not found"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        response
            .extensions_mut()
            .insert(AuditFailure(self.to_string()));
        response
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Exhausted reference periods are a conflict with existing numbers.
impl From<ReferenceError> for AppError {
    fn from(err: ReferenceError) -> Self {
        Self::Conflict(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::InvalidAmount { .. } | LedgerError::Validation(_) => {
                Self::Validation(err.to_string())
            }
            LedgerError::NotPayable { .. }
            | LedgerError::InvalidState { .. }
            | LedgerError::InvalidTransition { .. }
            | LedgerError::OutstandingBalance { .. } => Self::Conflict(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use rust_decimal::Decimal;

    #[test]
    fn not_found_status_code() {
        let err = AppError::NotFound("missing fine".to_string());
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "NOT_FOUND");
    }

    #[test]
    fn validation_status_code() {
        let err = AppError::Validation("bad field".to_string());
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(code, "VALIDATION_ERROR");
    }

    #[test]
    fn bad_request_status_code() {
        let (status, code) = AppError::BadRequest("malformed JSON".into()).status_and_code();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "BAD_REQUEST");
    }

    #[test]
    fn auth_status_codes() {
        assert_eq!(
            AppError::Unauthorized("no token".into()).status_and_code().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden("no authority".into()).status_and_code().0,
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn conflict_status_code() {
        let (status, code) = AppError::Conflict("duplicate tax id".into()).status_and_code();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "CONFLICT");
    }

    #[test]
    fn invalid_amount_maps_to_validation() {
        let err = AppError::from(LedgerError::InvalidAmount {
            reason: "exceeds balance 0.00".into(),
        });
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("invalid amount")));
    }

    #[test]
    fn invalid_state_maps_to_conflict() {
        let err = AppError::from(LedgerError::NotPayable {
            entity: "fine",
            status: "VOIDED".into(),
        });
        assert_eq!(err.status_and_code().0, StatusCode::CONFLICT);

        let err = AppError::from(LedgerError::OutstandingBalance {
            entity: "service",
            balance: Decimal::new(1250, 2),
        });
        assert_eq!(err.status_and_code().0, StatusCode::CONFLICT);
    }

    #[test]
    fn validation_error_from_muni_core() {
        let err = AppError::from(ValidationError::Required { field: "concept" });
        match &err {
            AppError::Validation(msg) => assert!(msg.contains("concept"), "got: {msg}"),
            other => panic!("expected Validation, got: {other:?}"),
        }
    }

    #[test]
    fn exhausted_reference_is_conflict() {
        let err = AppError::from(ReferenceError::Exhausted {
            prefix: "MUL",
            period: "202503".into(),
        });
        assert_eq!(err.status_and_code().1, "CONFLICT");
    }

    #[test]
    fn error_body_serializes() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: "TEST".to_string(),
                message: "test message".to_string(),
                details: None,
            },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("TEST"));
        assert!(!json.contains("details"));
    }

    async fn response_parts(err: AppError) -> (StatusCode, Option<String>, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let failure = response
            .extensions()
            .get::<AuditFailure>()
            .map(|f| f.0.clone());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, failure, body)
    }

    #[tokio::test]
    async fn into_response_attaches_audit_failure() {
        let (status, failure, body) =
            response_parts(AppError::Conflict("fine in status PAID".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error.code, "CONFLICT");
        assert!(failure.unwrap().contains("fine in status PAID"));
    }

    #[tokio::test]
    async fn into_response_internal_hides_details() {
        let (status, failure, body) =
            response_parts(AppError::Internal("db connection failed".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.message, "An internal error occurred");
        // The audit log still records the real cause.
        assert!(failure.unwrap().contains("db connection failed"));
    }
}
