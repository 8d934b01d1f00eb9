//! PKCE request storage trait.

use async_trait::async_trait;

use crate::types::OAuthRequest;
use crate::{AuthResult, Context};

/// Binds a PKCE challenge signature to the authorization request that created
/// it. Sessions are single-use: read once at token exchange, then deleted.
#[async_trait]
pub trait PkceRequestStorage: Send + Sync {
    async fn create_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &str,
        request: &OAuthRequest,
    ) -> AuthResult<String>;

    /// # Errors
    ///
    /// Returns `NotFound` ("pkce request not found") for an unknown or
    /// consumed signature.
    async fn get_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &str,
    ) -> AuthResult<OAuthRequest>;

    async fn update_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &str,
        request: &OAuthRequest,
        rev: Option<&str>,
    ) -> AuthResult<String>;

    /// # Errors
    ///
    /// Returns `NotFound` if the session was already deleted.
    async fn delete_pkce_request_session(&self, ctx: &Context, signature: &str)
    -> AuthResult<()>;
}
