//! Protocol objects persisted by the storage adapters.
//!
//! ## Domain Types
//!
//! - [`OAuthClient`] - OAuth 2.0 client registration
//! - [`OAuthRequest`] - one authorization, access or refresh grant in flight
//! - [`Session`] - subject, expiries and OIDC claims attached to a request
//! - [`User`] - local user with a hashed password

pub mod client;
pub mod request;
pub mod user;

pub use client::{OAuthClient, OAuthClientBuilder};
pub use request::{OAuthRequest, Session, TokenType};
pub use user::User;
