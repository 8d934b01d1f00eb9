//! OpenID Connect session storage trait.

use async_trait::async_trait;

use crate::types::OAuthRequest;
use crate::{AuthResult, Context};

/// Binds an authorization code to the OIDC request (nonce, requested claims)
/// it was issued for, until the code is exchanged.
#[async_trait]
pub trait OpenIdConnectSessionStorage: Send + Sync {
    async fn create_open_id_connect_session(
        &self,
        ctx: &Context,
        auth_code: &str,
        request: &OAuthRequest,
    ) -> AuthResult<String>;

    /// # Errors
    ///
    /// Returns `NotFound` ("openid session not found") for an unknown code.
    async fn get_open_id_connect_session(
        &self,
        ctx: &Context,
        auth_code: &str,
    ) -> AuthResult<OAuthRequest>;

    async fn update_open_id_connect_session(
        &self,
        ctx: &Context,
        auth_code: &str,
        request: &OAuthRequest,
        rev: Option<&str>,
    ) -> AuthResult<String>;

    async fn delete_open_id_connect_session(&self, ctx: &Context, auth_code: &str)
    -> AuthResult<()>;
}
