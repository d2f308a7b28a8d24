//! Error types for the storage crate.

use thiserror::Error;

pub use lifelog_core::storage::StorageError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Not found error.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Invalid table or column identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<Error> for StorageError {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => StorageError::Backend(e.to_string()),
            Error::Serialization(s) => StorageError::Serialization(s),
            Error::Database(s) => StorageError::Backend(s),
            Error::NotFound(s) => StorageError::NotFound(s),
            Error::InvalidIdentifier(s) => StorageError::InvalidIdentifier(s),
        }
    }
}
