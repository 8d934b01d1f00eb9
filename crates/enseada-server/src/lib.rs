//! Process wiring for the Enseada authorization core.
//!
//! Loads [`config::ServerConfig`], installs the tracing subscriber and
//! connects the auth module to CouchDB. The binary in `main.rs` is a thin
//! shell over these pieces.

pub mod config;
pub mod observability;

pub use config::{ConfigLoadError, LoggingConfig, ServerConfig, load_config};
