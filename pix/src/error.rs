//! Error types for the Efí PIX client

use rifa_core::gateway::GatewayError;
use thiserror::Error;

/// Errors that can occur when talking to the Efí PIX API
#[derive(Debug, Error)]
pub enum PixError {
    /// A required credential is missing from the configuration
    #[error("Missing configuration value {0}")]
    MissingConfig(String),

    /// The client certificate could not be loaded
    #[error("Client certificate unusable: {0}")]
    Certificate(String),

    /// HTTP request failed before a response arrived
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Response parsing failed
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// OAuth credentials were refused
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// API returned an error
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error body from the API
        message: String,
    },

    /// Webhook body could not be read
    #[error("Invalid notification: {0}")]
    InvalidNotification(String),
}

impl From<PixError> for GatewayError {
    fn from(error: PixError) -> Self {
        match error {
            PixError::Timeout => Self::Timeout,
            PixError::RequestFailed(msg) => Self::Transport(msg),
            PixError::Unauthorized(msg) => Self::Authentication(msg),
            PixError::ApiError { status, message } => {
                Self::Rejected(format!("status {status}: {message}"))
            }
            PixError::ResponseParseFailed(msg) | PixError::InvalidNotification(msg) => {
                Self::InvalidResponse(msg)
            }
            other @ (PixError::MissingConfig(_) | PixError::Certificate(_)) => {
                Self::Authentication(other.to_string())
            }
        }
    }
}
