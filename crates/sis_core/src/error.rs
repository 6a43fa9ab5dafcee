//! Error types for SIS core.

use serde::{Deserialize, Serialize};
use sis_storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type SisResult<T> = Result<T, SisError>;

/// Errors returned to callers of SIS operations.
///
/// Every variant maps to an HTTP-like status and a stable numeric code (see
/// [`SisError::status`] and [`SisError::code`]). Only [`SisError::Internal`] is
/// logged, exactly once, when it is created through [`SisError::internal`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SisError {
    /// The addressed document does not exist.
    #[error("{kind} {id} does not exist")]
    NotFound {
        /// The collection or type that was searched.
        kind: String,
        /// The identifier that was not found.
        id: String,
    },

    /// The request is malformed or references something that does not exist.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The caller lacks permission, or is not authenticated.
    #[error("Unauthorized. {0}")]
    Unauthorized(String),

    /// An unexpected backend or runtime failure.
    #[error("Internal error {0}")]
    Internal(String),
}

impl SisError {
    /// Creates a not found error.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Creates an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates an internal error and logs it.
    ///
    /// This is the only place internal errors are logged; callers that
    /// receive one propagate it without logging again.
    pub fn internal(message: impl fmt::Display) -> Self {
        let message = message.to_string();
        tracing::error!(error = %message, "internal error");
        Self::Internal(message)
    }

    /// Returns the HTTP status associated with the error.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::BadRequest(_) => 400,
            Self::Internal(_) => 500,
            Self::Unauthorized(_) => 401,
        }
    }

    /// Returns the numeric error code carried in the error payload.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 1000,
            Self::BadRequest(_) => 1001,
            Self::Internal(_) => 1002,
            Self::Unauthorized(_) => 1004,
        }
    }

    /// Returns the payload handed back to callers.
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.to_string(),
            code: self.code(),
        }
    }

    /// Returns true if the caller can correct the request (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<StorageError> for SisError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Duplicate { field, value, .. } => {
                Self::BadRequest(format!("duplicate value {value} for unique field {field}"))
            }
            StorageError::InvalidId(id) => Self::BadRequest(format!("invalid id {id}")),
            other => Self::internal(other),
        }
    }
}

/// The error body returned to callers: `{ "error": ..., "code": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human readable message.
    pub error: String,
    /// Stable numeric code.
    pub code: u16,
}
