//! Error types for tracker execution.

use thiserror::Error;

use tracker_cache::CacheError;
use tracker_search::SearchError;
use tracker_types::TrackerTypesError;

/// Failures reported by a [`RepositoryClient`](crate::RepositoryClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    /// Network or availability problem; the next cycle retries
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// A single entity could not be fetched or decoded
    #[error("Entity {id} failed: {reason}")]
    Entity { id: u64, reason: String },

    /// The repository answered with something that cannot be interpreted
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RepositoryError {
    /// Whether the failure is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

/// Errors raised while running a tracker cycle.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Index error: {0}")]
    Search(#[from] SearchError),

    #[error("Content cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] TrackerTypesError),

    /// The tracker was shut down between two entries
    #[error("Tracker is shut down")]
    Shutdown,

    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The dictionary model could not be loaded
    #[error("Models unavailable: {0}")]
    ModelsUnavailable(String),
}

impl TrackerError {
    /// Whether the cycle can simply be retried later.
    ///
    /// Transient failures and shutdowns never request a rollback.
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Repository(e) => e.is_transient(),
            TrackerError::Shutdown => true,
            _ => false,
        }
    }
}
