//! CouchDB backend for the Enseada document store contract.
//!
//! Talks to CouchDB over its HTTP API with basic authentication. Status codes
//! map onto [`enseada_storage::StorageError`]: 404 is `NotFound` (or
//! `DatabaseNotFound`), 409/412 are `Conflict`, 400 is `InvalidQuery`, and
//! transport failures are `Connection`. The change feed is a long-poll loop
//! over `GET /{db}/_changes`.

mod config;
mod responses;
mod store;

pub use config::CouchConfig;
pub use store::CouchDocumentStore;
