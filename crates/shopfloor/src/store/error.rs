//! Error types for store and repository operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or mutating the store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Project not found
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Order not found
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Backlog item not found
    #[error("Backlog item not found: {0}")]
    BacklogNotFound(String),

    /// Review not found
    #[error("Review not found: {0}")]
    ReviewNotFound(String),

    /// Escalation not found
    #[error("Escalation not found: {0}")]
    EscalationNotFound(String),

    /// Supervisor not found
    #[error("Supervisor not found: {0}")]
    SupervisorNotFound(String),

    /// Cross-project backlog item not found
    #[error("Cross-project item not found: {0}")]
    CrossProjectItemNotFound(String),

    /// Backing database file missing or unreadable. Distinct from the
    /// per-entity NotFound variants: the store itself cannot be reached.
    #[error("Store unavailable at {path}: {message}")]
    Unavailable { path: PathBuf, message: String },

    /// A schema migration failed. Fatal at startup.
    #[error("Migration to version {version} failed: {message}")]
    Migration { version: i64, message: String },

    /// A row lookup inside a larger operation came back empty. Repositories
    /// remap this to the typed NotFound for the entity they were addressing.
    #[error("Row not found")]
    RowNotFound,

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::RowNotFound,
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl StoreError {
    /// Replace a bare RowNotFound with the typed NotFound for the entity the
    /// caller was addressing; every other error passes through unchanged.
    pub(crate) fn or_not_found(self, entity: impl FnOnce() -> StoreError) -> StoreError {
        match self {
            StoreError::RowNotFound => entity(),
            other => other,
        }
    }

    /// True for the conditions that should block the application entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. } | StoreError::Migration { .. }
        )
    }
}
