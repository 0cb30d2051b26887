//! Unified error handling for CallBridge
//!
//! This module provides a single error type covering the failure scenarios of the
//! bridge (PBX connectivity, token checks, validation, session conflicts), with
//! automatic HTTP response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors that reach a caller are converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== PBX Errors ====================
    #[error("PBX unreachable: {0}")]
    AmiConnect(String),

    #[error("PBX authentication failed: {0}")]
    AmiAuth(String),

    #[error("Malformed PBX response: {0}")]
    AmiProtocol(String),

    #[error("PBX command failed: {0}")]
    Pbx(String),

    // ==================== Authentication Errors ====================
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // ==================== Session Errors ====================
    #[error("Extension {0} already has an active session")]
    DuplicateSession(String),

    #[error("No active session for extension {0}")]
    SessionNotFound(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::MissingField(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::InvalidToken(_) | AppError::TokenExpired | AppError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }

            // 403 Forbidden
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound(_) | AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict(_) | AppError::DuplicateSession(_) => StatusCode::CONFLICT,

            // 502 Bad Gateway
            AppError::AmiConnect(_)
            | AppError::AmiAuth(_)
            | AppError::AmiProtocol(_)
            | AppError::Pbx(_)
            | AppError::Upstream(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::AmiConnect(_) => "pbx_unreachable",
            AppError::AmiAuth(_) => "pbx_auth_failed",
            AppError::AmiProtocol(_) => "pbx_protocol_error",
            AppError::Pbx(_) => "pbx_error",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::DuplicateSession(_) => "duplicate_session",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::Validation(_) => "validation_error",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Upstream(_) => "upstream_error",
        }
    }

    /// Whether the failure is a transport-level PBX problem that a reconnect may fix
    pub fn is_connection_error(&self) -> bool {
        matches!(self, AppError::AmiConnect(_) | AppError::AmiAuth(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "{}", self);
        }
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AppError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Validation("bad phone".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Pbx("originate failed".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::DuplicateSession("2001".to_string()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::TokenExpired.error_code(), "token_expired");
        assert_eq!(
            AppError::AmiAuth("rejected".to_string()).error_code(),
            "pbx_auth_failed"
        );
    }

    #[test]
    fn test_connection_errors() {
        assert!(AppError::AmiConnect("timeout".to_string()).is_connection_error());
        assert!(!AppError::AmiProtocol("garbage".to_string()).is_connection_error());
    }
}
