//! In-memory document store backend for Enseada.
//!
//! This crate provides an in-memory implementation of the `DocumentStore`
//! trait from `enseada-storage`. Databases live in a papaya lock-free map;
//! each database serializes its writes so revision checks and the change log
//! stay consistent. Several [`InMemoryDocumentStore`] handles cloned from the
//! same instance behave like replicas sharing one database server.
//!
//! # Example
//!
//! ```ignore
//! use enseada_db_memory::InMemoryDocumentStore;
//! use enseada_storage::DocumentStore;
//!
//! let store = InMemoryDocumentStore::new();
//! store.create_database("users").await?;
//! let meta = store.create_doc("users", serde_json::json!({ "_id": "user-alice" })).await?;
//! assert!(meta.rev.starts_with("1-"));
//! ```

pub mod query;
pub mod storage;

pub use enseada_storage::{DocumentStore, StorageError};
pub use storage::InMemoryDocumentStore;

/// Creates a new shareable in-memory document store.
pub fn create_document_store() -> enseada_storage::DynDocumentStore {
    std::sync::Arc::new(InMemoryDocumentStore::new())
}
