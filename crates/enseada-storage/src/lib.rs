//! # enseada-storage
//!
//! Document store contract for the Enseada authorization core.
//!
//! This crate defines the traits and types every document backend must
//! implement. It contains no implementation; backends live in
//! `enseada-db-memory` (tests, single node) and `enseada-couchdb`.
//!
//! ## Overview
//!
//! The main trait is [`DocumentStore`], a revisioned JSON document database:
//! - CRUD with optimistic concurrency (every write to an existing document
//!   carries the revision last observed by the writer)
//! - Selector queries ([`FindQuery`]) in the Mango dialect
//! - A per-database change feed ([`DocumentStore::changes`])
//!
//! ## Example
//!
//! ```ignore
//! use enseada_storage::{DocumentStore, FindQuery, StorageError};
//! use serde_json::json;
//!
//! async fn find_by_sig(
//!     store: &dyn DocumentStore,
//!     sig: &str,
//! ) -> Result<Vec<serde_json::Value>, StorageError> {
//!     let query = FindQuery::new(json!({ "kind": "access_token", "sig": sig })).limit(2);
//!     store.find("oauth", &query).await
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::DocumentStore;
pub use types::{
    ChangeRecord, ChangeStream, ChangesSince, DocumentMeta, FindQuery, ID_FIELD, IndexDefinition,
    REV_FIELD, SortDirection, SortField, doc_id, doc_rev, revision_generation,
};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared document store trait object.
pub type DynDocumentStore = std::sync::Arc<dyn DocumentStore>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use enseada_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::DocumentStore;
    pub use crate::types::{
        ChangeRecord, ChangeStream, ChangesSince, DocumentMeta, FindQuery, IndexDefinition,
        SortDirection, SortField,
    };
    pub use crate::{DynDocumentStore, StorageResult};
}
