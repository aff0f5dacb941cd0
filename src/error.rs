//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache (absent, expired, or the miss-loader produced nothing)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key is already present and live
    #[error("Key already exists: {0}")]
    AlreadyExists(String),

    /// Snapshot file could not be opened, read, written or renamed
    #[error("Persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot stream is not a valid encoding of cache entries
    #[error("Persistence codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<tempfile::PersistError> for CacheError {
    fn from(err: tempfile::PersistError) -> Self {
        CacheError::Io(err.error)
    }
}

impl CacheError {
    /// Builds a `NotFound` error from any debuggable key.
    pub(crate) fn not_found<K: std::fmt::Debug>(key: &K) -> Self {
        CacheError::NotFound(format!("{:?}", key))
    }

    /// Builds an `AlreadyExists` error from any debuggable key.
    pub(crate) fn already_exists<K: std::fmt::Debug>(key: &K) -> Self {
        CacheError::AlreadyExists(format!("{:?}", key))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
