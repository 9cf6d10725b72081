//! Error types for the storage crate.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the typed stores.
#[derive(Debug, Error)]
pub enum Error {
    #[error("store io failure: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("record serialization failed: {0}")]
    Serialization(String),

    /// A failure in the underlying storage engine.
    #[error("storage engine failure: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<polyhub_core::storage::StorageError> for Error {
    fn from(e: polyhub_core::storage::StorageError) -> Self {
        match e {
            polyhub_core::storage::StorageError::Io(e) => Error::Io(e),
            polyhub_core::storage::StorageError::Serialization(s) => Error::Serialization(s),
            polyhub_core::storage::StorageError::KeyNotFound(s) => Error::NotFound(s),
            other => Error::Storage(other.to_string()),
        }
    }
}

impl From<Error> for polyhub_core::error::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(s) => polyhub_core::error::Error::NotFound(s),
            Error::InvalidInput(s) => polyhub_core::error::Error::Validation(s),
            other => polyhub_core::error::Error::Storage(other.to_string()),
        }
    }
}
