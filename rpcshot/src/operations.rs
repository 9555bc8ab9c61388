// Copyright 2025 Oxide Computer Company
//! Ready-made errors for common REST outcomes
//!
//! Handlers return these as `Err(...)`; the endpoint renders them with the
//! status and code shown.

use crate::error::ApplicationError;
use crate::error::ErrorCategory;
use http::StatusCode;

/// 400 `BAD_REQUEST`
pub fn bad_request(correlation_id: Option<&str>, message: &str) -> ApplicationError {
    ApplicationError::bad_request("BAD_REQUEST", message)
        .with_correlation_id(correlation_id)
}

/// 401 `UNAUTHORIZED`
pub fn unauthorized(
    correlation_id: Option<&str>,
    message: &str,
) -> ApplicationError {
    ApplicationError::unauthorized("UNAUTHORIZED", message)
        .with_correlation_id(correlation_id)
}

/// 404 `NOT_FOUND`
pub fn not_found(correlation_id: Option<&str>, message: &str) -> ApplicationError {
    ApplicationError::not_found("NOT_FOUND", message)
        .with_correlation_id(correlation_id)
}

/// 409 `CONFLICT`
pub fn conflict(correlation_id: Option<&str>, message: &str) -> ApplicationError {
    ApplicationError::conflict("CONFLICT", message)
        .with_correlation_id(correlation_id)
}

/// 440 `SESSION_EXPIRED`
pub fn session_expired(
    correlation_id: Option<&str>,
    message: &str,
) -> ApplicationError {
    let status = StatusCode::from_u16(440)
        .unwrap_or(StatusCode::UNAUTHORIZED);
    ApplicationError::unknown("SESSION_EXPIRED", message)
        .with_status(status)
        .with_correlation_id(correlation_id)
}

/// 500 `INTERNAL`
pub fn internal_error(
    correlation_id: Option<&str>,
    message: &str,
) -> ApplicationError {
    ApplicationError::unknown("INTERNAL", message)
        .with_correlation_id(correlation_id)
}

/// 503 `SERVER_UNAVAILABLE`
pub fn server_unavailable(
    correlation_id: Option<&str>,
    message: &str,
) -> ApplicationError {
    ApplicationError::new(ErrorCategory::Unsupported, "SERVER_UNAVAILABLE", message)
        .with_status(StatusCode::SERVICE_UNAVAILABLE)
        .with_correlation_id(correlation_id)
}
