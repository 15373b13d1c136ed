use serde::Deserialize;
use thiserror::Error;

use kingest_core::error::is_transient_status;
use kingest_core::IngestError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service error {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
        permanent: bool,
    },

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ServiceErrorBody,
}

#[derive(Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(rename = "@message", default)]
    detail: Option<String>,
    #[serde(rename = "@permanent", default)]
    permanent: Option<bool>,
}

impl ClientError {
    /// Build a service error from a non-success response body.
    ///
    /// The engine answers with `{"error": {"code", "message", "@permanent"}}`;
    /// the explicit `@permanent` flag wins over the status-code rule.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                let e = envelope.error;
                let message = e
                    .detail
                    .filter(|d| !d.is_empty())
                    .unwrap_or(e.message);
                ClientError::Service {
                    status,
                    code: e.code,
                    message,
                    permanent: e.permanent.unwrap_or(!is_transient_status(status)),
                }
            }
            Err(_) => ClientError::Service {
                status,
                code: String::new(),
                message: body.chars().take(512).collect(),
                permanent: !is_transient_status(status),
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Service { permanent, .. } => !permanent,
            _ => false,
        }
    }
}

impl From<ClientError> for IngestError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Http(err) if err.is_decode() => IngestError::Decode(err.to_string()),
            ClientError::Http(err) => IngestError::Network(err.to_string()),
            ClientError::Service {
                status: 401 | 403,
                message,
                ..
            } => IngestError::Unauthorized(message),
            ClientError::Service {
                status,
                code,
                message,
                permanent,
            } => IngestError::Service {
                status,
                code,
                message,
                permanent,
            },
            ClientError::Auth(msg) => IngestError::Unauthorized(msg),
            ClientError::Decode(msg) => IngestError::Decode(msg),
            ClientError::InvalidEndpoint(msg) => IngestError::Config(msg),
        }
    }
}
