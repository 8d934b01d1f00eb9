//! The document store trait every backend implements.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{ChangeStream, ChangesSince, DocumentMeta, FindQuery, IndexDefinition};

/// A revisioned JSON document database partitioned into named databases.
///
/// Every document carries an `_id` and a `_rev`. Writes to an existing
/// document must supply the revision last observed by the writer; a stale or
/// missing revision is rejected with [`StorageError::Conflict`] and nothing is
/// overwritten. Implementations must be thread-safe (`Send + Sync`) and are
/// shared as [`crate::DynDocumentStore`].
///
/// # Example
///
/// ```ignore
/// use enseada_storage::{DocumentStore, StorageError};
///
/// async fn touch(store: &dyn DocumentStore, id: &str) -> Result<String, StorageError> {
///     let mut doc = store.get("users", id).await?;
///     doc["touched"] = true.into();
///     store.put("users", id, doc).await
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ==================== Databases ====================

    /// Creates a database. Returns `false` when it already existed.
    ///
    /// # Errors
    ///
    /// Returns an error for infrastructure issues or an invalid name.
    async fn create_database(&self, db: &str) -> Result<bool, StorageError>;

    /// Returns `true` if the database exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues.
    async fn database_exists(&self, db: &str) -> Result<bool, StorageError>;

    /// Creates (or replaces) a named secondary index.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the database does not exist.
    async fn create_index(&self, db: &str, index: &IndexDefinition) -> Result<(), StorageError>;

    // ==================== Documents ====================

    /// Creates a new document.
    ///
    /// The `_id` field is used when present, otherwise the backend generates one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a live document with the same id exists.
    /// Returns `StorageError::InvalidDocument` if the body is not a JSON object.
    async fn create_doc(&self, db: &str, doc: Value) -> Result<DocumentMeta, StorageError>;

    /// Writes a document at `id`, returning the new revision.
    ///
    /// The body's `_rev` must equal the current revision when the document exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if `_rev` is stale, or missing while the
    /// document exists.
    async fn put(&self, db: &str, id: &str, doc: Value) -> Result<String, StorageError>;

    /// Reads a document including its `_id` and `_rev`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the document does not exist or was deleted.
    async fn get(&self, db: &str, id: &str) -> Result<Value, StorageError>;

    /// Fetches only the current revision of a document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the document does not exist or was deleted.
    async fn get_meta(&self, db: &str, id: &str) -> Result<String, StorageError>;

    /// Deletes a document at the given revision, returning the tombstone revision.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the document does not exist.
    /// Returns `StorageError::Conflict` if `rev` is stale.
    async fn delete(&self, db: &str, id: &str, rev: &str) -> Result<String, StorageError>;

    // ==================== Queries ====================

    /// Runs a selector query and returns the matching documents.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidQuery` for unsupported operators.
    async fn find(&self, db: &str, query: &FindQuery) -> Result<Vec<Value>, StorageError>;

    // ==================== Change feed ====================

    /// Subscribes to the change feed of a database.
    ///
    /// The stream ends or yields an error when the subscription is lost; the
    /// consumer resubscribes from the last sequence it saw. Dropping the stream
    /// cancels the subscription.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the database does not exist.
    async fn changes(&self, db: &str, since: ChangesSince) -> Result<ChangeStream, StorageError>;

    // ==================== Metadata ====================

    /// Returns a short backend name used in logs.
    fn backend_name(&self) -> &'static str;
}
