//! Client storage trait.

use async_trait::async_trait;

use crate::types::OAuthClient;
use crate::{AuthResult, Context};

/// Storage operations for OAuth 2.0 client registrations.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Persists a new client and records its revision on `client`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a client with the same id exists.
    async fn create_client(&self, ctx: &Context, client: &mut OAuthClient) -> AuthResult<()>;

    /// Fetches a client by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` ("client not found") if it does not exist.
    async fn get_client(&self, ctx: &Context, id: &str) -> AuthResult<OAuthClient>;

    /// Writes the client, fetching the current revision first if `client.rev`
    /// is unset.
    async fn update_client(&self, ctx: &Context, client: &mut OAuthClient) -> AuthResult<()>;

    async fn delete_client(&self, ctx: &Context, id: &str) -> AuthResult<()>;

    async fn list_clients(&self, ctx: &Context) -> AuthResult<Vec<OAuthClient>>;
}
