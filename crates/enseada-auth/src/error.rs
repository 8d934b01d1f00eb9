//! Error types for the authorization core.
//!
//! Document store failures are translated into the domain kinds callers act
//! on: not found, conflict, validation, invalid credentials and cancellation.

use std::fmt;

use enseada_storage::StorageError;

/// Errors that can occur in the persistence adapters and policy subsystem.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// A lookup by correlation key matched no document.
    #[error("{resource} not found")]
    NotFound {
        /// What was looked up, e.g. "pkce request".
        resource: String,
    },

    /// A write raced a concurrent writer on the same document.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting write.
        message: String,
    },

    /// Caller-supplied data violates a precondition.
    #[error("{message}")]
    Validation {
        /// Description of the violated precondition.
        message: String,
    },

    /// Username or password did not match.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The request context was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The request context deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The document store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a revision conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if this is a validation error.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns `true` if the context was cancelled or its deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Returns `true` if this error is caused by the caller.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Conflict { .. }
                | Self::Validation { .. }
                | Self::InvalidCredentials
                | Self::Cancelled
        )
    }

    /// Returns `true` if this is a server-side error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::InvalidCredentials => ErrorCategory::Authentication,
            Self::Cancelled | Self::DeadlineExceeded => ErrorCategory::Cancellation,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Serialization { .. } | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// HTTP status code used when the error crosses an administrative API.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Validation { .. } => 400,
            Self::InvalidCredentials => 401,
            Self::Cancelled => 499,
            Self::DeadlineExceeded => 504,
            Self::Storage { .. }
            | Self::Serialization { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => 500,
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { db, id } => Self::not_found(format!("document {id} in {db}")),
            StorageError::Conflict { db, id } => {
                Self::conflict(format!("document {id} in {db} was modified concurrently"))
            }
            StorageError::Serialization { message } => Self::Serialization { message },
            other => Self::storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Categories of auth errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lookup matched nothing.
    NotFound,
    /// Optimistic concurrency conflict.
    Conflict,
    /// Invalid caller input.
    Validation,
    /// Credential mismatch.
    Authentication,
    /// Cancelled or timed out.
    Cancellation,
    /// Document store or network failure.
    Infrastructure,
    /// Configuration problem.
    Configuration,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Cancellation => write!(f, "cancellation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
