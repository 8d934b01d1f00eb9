//! Authorization core for Enseada.
//!
//! This crate persists OAuth 2.0 / OpenID Connect protocol state and RBAC
//! policy in a shared, revisioned document store, and keeps each server
//! replica's in-memory policy converged without a coordinator.
//!
//! # Features
//!
//! - **Persistence ports**: narrow storage traits for clients, token
//!   sessions, OIDC sessions, PKCE requests and users, consumed by an
//!   external OAuth 2.0 protocol engine
//! - **Optimistic concurrency**: every write carries the revision last
//!   observed; stale writes fail with [`AuthError::Conflict`]
//! - **Password hashing**: Argon2id with a per-call salt
//! - **RBAC**: an enforcer over `(subject, object, action)` permissions and
//!   transitive role assignments
//! - **Policy sync**: a change feed watcher and a debounced reload service
//!   per replica
//! - **Cancellation**: every store call runs under a [`Context`]
//!
//! # Modules
//!
//! - [`storage`] - persistence port traits
//! - [`document`] - document store backed implementations
//! - [`policy`] - rule model, adapter, enforcer, watcher and reload service
//! - [`types`] - protocol objects
//! - [`module`] - startup wiring

pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod migrate;
pub mod module;
pub mod password;
pub mod policy;
pub mod storage;
pub mod types;

pub use config::{AuthConfig, ConfigError, DatabaseNames, PasswordConfig, SyncConfig};
pub use context::Context;
pub use document::AuthStore;
pub use error::{AuthError, ErrorCategory};
pub use module::{AuthDeps, AuthModule};
pub use password::SecretHasher;
pub use policy::{Enforcer, PolicyChange, PolicyChangeNotifier, PolicyRule};

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Commonly used types.
pub mod prelude {
    pub use crate::storage::{
        Authenticator, ClientStorage, OpenIdConnectSessionStorage, PkceRequestStorage,
        RequestStorage, UserStorage,
    };
    pub use crate::types::{OAuthClient, OAuthRequest, Session, TokenType, User};
    pub use crate::{AuthError, AuthModule, AuthResult, Context, Enforcer};
}
