//! Persistence ports consumed by the OAuth 2.0 / OIDC protocol engine.
//!
//! Each port is a narrow capability ("something that can create and find PKCE
//! sessions") so call sites depend only on what they use. Every operation
//! takes a [`Context`](crate::Context) that cancels or times out the
//! underlying document store call.
//!
//! # Implementations
//!
//! Document-backed implementations live in [`crate::document`].

pub mod client;
pub mod oidc;
pub mod pkce;
pub mod request;
pub mod user;

pub use client::ClientStorage;
pub use oidc::OpenIdConnectSessionStorage;
pub use pkce::PkceRequestStorage;
pub use request::RequestStorage;
pub use user::{Authenticator, UserStorage};
