//! Error types for the documentation relay.
//!
//! Channel-level errors terminate only the owning connection, HTTP path errors
//! terminate a single request, and nothing here is allowed to take the process
//! down.

use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single documentation generation.
///
/// Kept separate from [`RelayError`] because one failure is fanned out to every
/// coalesced waiter, which requires `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct GenerationFailure(pub String);

impl GenerationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Relay errors.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid import map configuration: {0}")]
    Configuration(String),

    #[error("Documentation generation failed: {0}")]
    Generation(#[from] GenerationFailure),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// HTTP status used when this error ends a content request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::NotFound(_)
            | RelayError::ChannelClosed
            | RelayError::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::WebSocket(e.to_string())
    }
}

impl From<hyper::Error> for RelayError {
    fn from(e: hyper::Error) -> Self {
        RelayError::Upgrade(e.to_string())
    }
}
