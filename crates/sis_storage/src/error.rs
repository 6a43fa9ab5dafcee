//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A write would violate a unique field constraint.
    #[error("duplicate key in {collection}: {field} = {value}")]
    Duplicate {
        /// The collection written to.
        collection: String,
        /// The unique field that collided.
        field: String,
        /// The colliding value, rendered as JSON.
        value: String,
    },

    /// A value could not be interpreted as a document id.
    #[error("invalid document id: {0}")]
    InvalidId(String),

    /// The backend failed for a reason outside the caller's control.
    #[error("backend failure: {0}")]
    Backend(String),

    /// The store is closed.
    #[error("store is closed")]
    Closed,
}

impl StorageError {
    /// Returns true if the error was caused by the written data rather than
    /// by the backend.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}
