use std::time::Duration;

use thiserror::Error;

/// Service error codes meaning streaming ingestion is switched off for the
/// target. Queued ingestion is unaffected by them.
pub const STREAMING_DISABLED_CODES: &[&str] = &[
    "BadRequest_StreamingIngestionPolicyNotEnabled",
    "BadRequest_StreamingIngestionDisabledForCluster",
    "StreamingIngestionPolicyNotEnabled",
];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid ingestion properties: {0}")]
    InvalidProperties(String),

    #[error("payload of {size} bytes exceeds the streaming limit of {limit} bytes")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("{strategy} ingestion does not support this source: {reason}")]
    Unsupported {
        strategy: &'static str,
        reason: String,
    },

    #[error("authorization failed: {0}")]
    Unauthorized(String),

    #[error("service returned {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
        permanent: bool,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {message}")]
    Storage { message: String, transient: bool },

    #[error("queue error: {message}")]
    Queue { message: String, transient: bool },

    #[error("no {0} available in ingestion resources")]
    NoResources(&'static str),

    #[error("ingestion resources unavailable: {message}")]
    ResourcesUnavailable { message: String, transient: bool },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed service response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{operation} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last: Box<IngestError>,
    },
}

/// What a caller should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Same request may succeed later.
    Retry,
    /// Streaming can never accept this payload; queued ingestion can.
    Fallback,
    /// Nothing will change the outcome.
    Fail,
}

/// Coarse classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Cancelled,
}

impl IngestError {
    pub fn disposition(&self) -> Disposition {
        match self {
            IngestError::SizeExceeded { .. } | IngestError::Unsupported { .. } => {
                Disposition::Fallback
            }
            IngestError::Service { status: 413, .. } => Disposition::Fallback,
            IngestError::Service { permanent, .. } => {
                if self.is_streaming_disabled() {
                    Disposition::Fallback
                } else if *permanent {
                    Disposition::Fail
                } else {
                    Disposition::Retry
                }
            }
            // A per-request timeout; an expired caller deadline is caught by
            // `CallContext::check` before the next attempt.
            IngestError::Network(_) | IngestError::Timeout(_) => Disposition::Retry,
            IngestError::Storage { transient, .. }
            | IngestError::Queue { transient, .. }
            | IngestError::ResourcesUnavailable { transient, .. } => {
                if *transient {
                    Disposition::Retry
                } else {
                    Disposition::Fail
                }
            }
            IngestError::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => Disposition::Retry,
                _ => Disposition::Fail,
            },
            _ => Disposition::Fail,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Cancelled | IngestError::Timeout(_) => ErrorKind::Cancelled,
            e if e.disposition() == Disposition::Retry => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }

    /// True when the service says streaming is disabled for the table or cluster.
    pub fn is_streaming_disabled(&self) -> bool {
        match self {
            IngestError::Service { code, .. } => STREAMING_DISABLED_CODES
                .iter()
                .any(|c| code.eq_ignore_ascii_case(c)),
            _ => false,
        }
    }

    /// True for errors produced after a retry budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, IngestError::RetriesExhausted { .. })
    }

    /// Classify an HTTP status without a structured body.
    pub fn from_status(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => IngestError::Unauthorized(message),
            _ => IngestError::Service {
                status,
                code: code.into(),
                message,
                permanent: !is_transient_status(status),
            },
        }
    }
}

/// 408, 429 and every 5xx are worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}
