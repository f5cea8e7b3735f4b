//! Error types shared by the registry, message log and dispatcher.

use axum::http::StatusCode;
use thiserror::Error;

/// Failure of a chat core operation.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A required field was missing or malformed. No side effect happened.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An inbound frame arrived from a socket with no registry row.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// The connect authorization hook refused the handshake.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Numeric code carried by outbound error frames (HTTP semantics).
    pub fn code(&self) -> u16 {
        self.status().as_u16()
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::Storage(_) | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::Internal(format!("task join: {}", err))
    }
}

/// Per-recipient push failure. Never aborts a fan-out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The remote socket no longer exists.
    #[error("connection {0} is gone")]
    Gone(String),

    #[error("failed to encode frame: {0}")]
    Encode(String),
}
