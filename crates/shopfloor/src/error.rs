//! Engine-level error type.

use thiserror::Error;

use crate::store::StoreError;
use crate::workflow::ValidationError;

/// Everything an engine operation can fail with
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Engine not configured or already stopped. Operations fail with this
    /// before touching storage.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Storage failure, including typed not-found conditions.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A request the workflow rules refused before any write.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The engine is serving reads from a legacy snapshot; writes are
    /// unavailable until the database comes back.
    #[error("Store is read-only (legacy fallback): {0}")]
    ReadOnly(String),
}

impl EngineError {
    /// True for conditions that should halt the application entirely
    /// rather than surface as a retryable operation failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_fatal())
    }
}

/// Convenience type alias for Result with EngineError
pub type EngineResult<T> = Result<T, EngineError>;
