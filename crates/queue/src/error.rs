//! Queue error types.

use thiserror::Error;

use kingest_core::error::is_transient_status;
use kingest_core::IngestError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message encode error: {0}")]
    Encode(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("queue service returned {status}: {message}")]
    Provider { status: u16, message: String },
}

impl QueueError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => QueueError::Auth(message),
            404 => QueueError::NotFound(message),
            _ => QueueError::Provider { status, message },
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Connection(_) | QueueError::Timeout(_) => true,
            QueueError::Provider { status, .. } => is_transient_status(*status),
            QueueError::Encode(_) | QueueError::NotFound(_) | QueueError::Auth(_) => false,
        }
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            QueueError::Timeout(e.to_string())
        } else {
            QueueError::Connection(e.to_string())
        }
    }
}

impl From<QueueError> for IngestError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Auth(msg) => IngestError::Unauthorized(msg),
            other => IngestError::Queue {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}
