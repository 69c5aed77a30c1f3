//! Error types for HTTP handlers.
//!
//! [`AppError`] bridges [`RaffleError`] and HTTP responses. The body always
//! carries the error's stable code so clients can branch on it.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rifa_core::RaffleError;
use rifa_core::gateway::GatewayError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "bad_request")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "unauthorized")
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, "forbidden")
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "invalid_request")
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "service_unavailable")
    }

    /// HTTP status of the response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<RaffleError> for AppError {
    fn from(err: RaffleError) -> Self {
        let status = match &err {
            RaffleError::NumberUnavailable { .. }
            | RaffleError::InsufficientSupply { .. }
            | RaffleError::RaffleClosed { .. }
            | RaffleError::AlreadyFinalized(_)
            | RaffleError::PaymentNotPending { .. } => StatusCode::CONFLICT,
            RaffleError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RaffleError::RaffleNotFound(_)
            | RaffleError::PaymentNotFound(_)
            | RaffleError::RaffleNotDrawn(_)
            | RaffleError::NoEligibleTickets(_) => StatusCode::NOT_FOUND,
            RaffleError::ReservationExpired(_) => StatusCode::GONE,
            RaffleError::InvalidNotification => StatusCode::UNAUTHORIZED,
            RaffleError::NotOwner => StatusCode::FORBIDDEN,
            RaffleError::PaymentProviderError(GatewayError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            RaffleError::PaymentProviderError(_) => StatusCode::BAD_GATEWAY,
            RaffleError::AllocationRaceFatal { .. } | RaffleError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let code = err.code();
        if status.is_server_error() {
            Self::new(status, "An internal error occurred", code).with_source(err.into())
        } else {
            Self::new(status, err.to_string(), code)
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "An internal error occurred",
            "internal_error",
        )
        .with_source(err)
    }
}
