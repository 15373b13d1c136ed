use thiserror::Error;

use kingest_core::IngestError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid container URI: {0}")]
    InvalidUri(String),
}

impl StorageError {
    /// Whether the same upload could succeed if tried again.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::ObjectStore(e) => !matches!(
                e,
                object_store::Error::NotFound { .. }
                    | object_store::Error::InvalidPath { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::NotImplemented
                    | object_store::Error::AlreadyExists { .. }
                    | object_store::Error::Precondition { .. }
                    | object_store::Error::UnknownConfigurationKey { .. }
                    | object_store::Error::NotModified { .. }
                    | object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
            ),
            StorageError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            StorageError::InvalidUri(_) => false,
        }
    }

    /// The container SAS was rejected or lacks the needed permission.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore(
                object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
            )
        )
    }
}

impl From<StorageError> for IngestError {
    fn from(e: StorageError) -> Self {
        match e {
            // A missing local file is the caller's problem, not the store's.
            StorageError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                IngestError::Io(io)
            }
            auth if auth.is_auth() => IngestError::Unauthorized(auth.to_string()),
            other => IngestError::Storage {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}
