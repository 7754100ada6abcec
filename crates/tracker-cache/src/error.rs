//! Error types for the content cache.

use thiserror::Error;

/// Errors that can occur during content cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Change set encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not allowed in the current access mode
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Tenant, id or path that cannot be mapped inside the cache root
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Cache lock poisoned by a panicking writer
    #[error("Cache lock poisoned: {0}")]
    Lock(String),
}
