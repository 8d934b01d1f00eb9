//! Token session storage trait.
//!
//! Authorize code, access token and refresh token sessions share one shape:
//! an [`OAuthRequest`] correlated by the token signature.

use async_trait::async_trait;

use crate::types::{OAuthRequest, TokenType};
use crate::{AuthResult, Context};

/// Storage operations for token sessions.
#[async_trait]
pub trait RequestStorage: Send + Sync {
    /// Stores a request under `(kind, signature)`. Returns the new revision.
    async fn create_request_session(
        &self,
        ctx: &Context,
        kind: TokenType,
        signature: &str,
        request: &OAuthRequest,
    ) -> AuthResult<String>;

    /// Looks up a request by signature.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no session of that kind carries the signature.
    async fn get_request_session(
        &self,
        ctx: &Context,
        kind: TokenType,
        signature: &str,
    ) -> AuthResult<OAuthRequest>;

    /// Replaces the stored request.
    ///
    /// With `rev` unset the current revision is fetched first and one
    /// conflicting write is retried. A supplied stale `rev` surfaces
    /// `Conflict` immediately.
    async fn update_request_session(
        &self,
        ctx: &Context,
        kind: TokenType,
        signature: &str,
        request: &OAuthRequest,
        rev: Option<&str>,
    ) -> AuthResult<String>;

    /// Deletes the session with this signature.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it was already deleted.
    async fn delete_request_session(
        &self,
        ctx: &Context,
        kind: TokenType,
        signature: &str,
    ) -> AuthResult<()>;

    /// Deletes every session of `kind` issued from the grant `request_id`.
    /// Returns how many were deleted.
    async fn revoke_by_request_id(
        &self,
        ctx: &Context,
        kind: TokenType,
        request_id: &str,
    ) -> AuthResult<usize>;

    /// Sessions of `kind`, newest first, optionally for one client.
    async fn list_request_sessions(
        &self,
        ctx: &Context,
        kind: TokenType,
        client_id: Option<&str>,
    ) -> AuthResult<Vec<OAuthRequest>>;
}
