//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
///
/// An absent object is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed canonical object form or identifier.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Malformed pack or pack index.
    #[error("invalid pack: {0}")]
    InvalidPack(String),

    /// A well-formed pack feature this store does not handle.
    #[error("unsupported pack format: {0}")]
    UnsupportedPack(String),

    /// A delta could not be applied or its chain could not be resolved.
    #[error("corrupt delta: {0}")]
    CorruptDelta(String),

    /// A loose object path already holds different content.
    #[error("object conflict: {0}")]
    ObjectConflict(String),

    /// A reference was not found.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// A reference is malformed or cannot be resolved.
    #[error("invalid reference: {0}")]
    InvalidRef(String),

    /// A directory does not hold a repository.
    #[error("not a git repository: {0}")]
    NotARepository(String),
}

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
