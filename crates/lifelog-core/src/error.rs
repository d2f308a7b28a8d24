//! Crate-level error type.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the core runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage collaborator failure.
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// LLM backend failure.
    #[error("llm error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    /// Extension lifecycle failure.
    #[error("extension error: {0}")]
    Extension(#[from] crate::extension::ExtensionError),

    /// Malformed input that cannot be routed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
