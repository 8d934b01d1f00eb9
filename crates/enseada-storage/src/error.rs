//! Error types for the document store contract.

use std::fmt;

/// Errors that can occur during document store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The requested document does not exist (or was deleted).
    #[error("Document not found: {db}/{id}")]
    NotFound {
        /// Database the lookup ran against.
        db: String,
        /// Document id.
        id: String,
    },

    /// The database itself does not exist.
    #[error("Database not found: {db}")]
    DatabaseNotFound {
        /// Name of the missing database.
        db: String,
    },

    /// The write carried a stale or missing revision.
    #[error("Document update conflict: {db}/{id}")]
    Conflict {
        /// Database the write ran against.
        db: String,
        /// Document id.
        id: String,
    },

    /// The document body is not acceptable to the store.
    #[error("Invalid document: {message}")]
    InvalidDocument {
        /// Description of why the document is invalid.
        message: String,
    },

    /// The selector, sort or index definition is malformed.
    #[error("Invalid query: {message}")]
    InvalidQuery {
        /// Description of the query problem.
        message: String,
    },

    /// The backend could not be reached or the connection dropped.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// Any other backend failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(db: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            db: db.into(),
            id: id.into(),
        }
    }

    /// Creates a new `DatabaseNotFound` error.
    #[must_use]
    pub fn database_not_found(db: impl Into<String>) -> Self {
        Self::DatabaseNotFound { db: db.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(db: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            db: db.into(),
            id: id.into(),
        }
    }

    /// Creates a new `InvalidDocument` error.
    #[must_use]
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidQuery` error.
    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
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

    /// Returns `true` if the failure is transient and the operation may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::DatabaseNotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::InvalidDocument { .. } | Self::InvalidQuery { .. } => ErrorCategory::Validation,
            Self::Connection { .. } => ErrorCategory::Infrastructure,
            Self::Serialization { .. } | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Document not found.
    NotFound,
    /// Revision conflict.
    Conflict,
    /// Malformed document or query.
    Validation,
    /// Infrastructure/connection error.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
