//! Entry point to the document-backed persistence adapters.

use std::time::Duration;

use enseada_storage::DynDocumentStore;

use super::correlated::CorrelatedCollection;
use super::oidc::AUTH_CODE_INDEX;
use super::request::SIGNATURE_INDEX;
use super::{
    DocumentClientStorage, DocumentGateway, DocumentOpenIdConnectSessionStorage,
    DocumentPkceRequestStorage, DocumentRequestStorage, DocumentUserStorage,
};
use crate::config::DatabaseNames;
use crate::password::SecretHasher;
use crate::storage::{ClientStorage, UserStorage};
use crate::types::{OAuthClient, User};
use crate::{AuthResult, Context};

/// Id of the client used by the bundled web UI.
pub const DEFAULT_CLIENT_ID: &str = "enseada";

/// Document store backend for OAuth state and users.
///
/// Holds the shared store handle and hands out the adapter for each entity.
/// Adapters are cheap to create and share the same store connection.
#[derive(Debug, Clone)]
pub struct AuthStore {
    oauth: DocumentGateway,
    users: DocumentGateway,
    hasher: SecretHasher,
}

impl AuthStore {
    #[must_use]
    pub fn new(
        store: DynDocumentStore,
        databases: &DatabaseNames,
        request_timeout: Option<Duration>,
        hasher: SecretHasher,
    ) -> Self {
        Self {
            oauth: DocumentGateway::new(store.clone(), &databases.oauth, request_timeout),
            users: DocumentGateway::new(store, &databases.users, request_timeout),
            hasher,
        }
    }

    #[must_use]
    pub fn hasher(&self) -> &SecretHasher {
        &self.hasher
    }

    // -------------------------------------------------------------------------
    // Storage Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn clients(&self) -> DocumentClientStorage {
        DocumentClientStorage::new(self.oauth.clone())
    }

    /// Authorize code, access token and refresh token sessions.
    #[must_use]
    pub fn requests(&self) -> DocumentRequestStorage {
        DocumentRequestStorage::new(CorrelatedCollection::new(
            self.oauth.clone(),
            "sig",
            SIGNATURE_INDEX,
        ))
    }

    #[must_use]
    pub fn oidc_sessions(&self) -> DocumentOpenIdConnectSessionStorage {
        DocumentOpenIdConnectSessionStorage::new(CorrelatedCollection::new(
            self.oauth.clone(),
            "auth_code",
            AUTH_CODE_INDEX,
        ))
    }

    #[must_use]
    pub fn pkce_requests(&self) -> DocumentPkceRequestStorage {
        DocumentPkceRequestStorage::new(CorrelatedCollection::new(
            self.oauth.clone(),
            "sig",
            SIGNATURE_INDEX,
        ))
    }

    /// User storage, also the [`Authenticator`](crate::storage::Authenticator).
    #[must_use]
    pub fn users(&self) -> DocumentUserStorage {
        DocumentUserStorage::new(self.users.clone(), self.hasher.clone())
    }

    // -------------------------------------------------------------------------
    // Bootstrap
    // -------------------------------------------------------------------------

    /// Registers the web UI client unless it already exists.
    pub async fn init_default_clients(
        &self,
        ctx: &Context,
        public_host: &str,
        secret: &str,
    ) -> AuthResult<()> {
        let redirect_uri = format!("{}/ui/callback", public_host.trim_end_matches('/'));
        let mut client = OAuthClient::builder(DEFAULT_CLIENT_ID)
            .secret(secret)
            .redirect_uris([redirect_uri])
            .grant_types(["authorization_code", "refresh_token"])
            .response_types(["code"])
            .scopes(["openid", "profile", "offline_access"])
            .build(&self.hasher)?;

        match self.clients().create_client(ctx, &mut client).await {
            Ok(()) => {
                tracing::info!(client_id = DEFAULT_CLIENT_ID, "registered default client");
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!(client_id = DEFAULT_CLIENT_ID, "default client already registered");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Creates the root user unless it already exists.
    pub async fn ensure_root_user(&self, ctx: &Context, password: &str) -> AuthResult<()> {
        let mut root = User::root(password);
        match self.users().save_user(ctx, &mut root).await {
            Ok(()) => {
                tracing::info!("created root user");
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!("root user already exists");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use enseada_db_memory::InMemoryDocumentStore;
    use enseada_storage::DocumentStore;

    use super::*;
    use crate::config::PasswordConfig;
    use crate::storage::Authenticator;

    async fn auth_store() -> AuthStore {
        let store = InMemoryDocumentStore::new();
        let names = DatabaseNames::default();
        store.create_database(&names.oauth).await.unwrap();
        store.create_database(&names.users).await.unwrap();
        AuthStore::new(
            Arc::new(store),
            &names,
            None,
            SecretHasher::new(&PasswordConfig::for_testing()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_default_client_bootstrap_is_idempotent() {
        let store = auth_store().await;
        let ctx = Context::background();
        store
            .init_default_clients(&ctx, "https://enseada.example.com/", "ui-secret")
            .await
            .unwrap();
        store
            .init_default_clients(&ctx, "https://enseada.example.com", "other")
            .await
            .unwrap();

        let client = store.clients().get_client(&ctx, DEFAULT_CLIENT_ID).await.unwrap();
        assert_eq!(
            client.redirect_uris,
            vec!["https://enseada.example.com/ui/callback"]
        );
        assert!(client.verify_secret(store.hasher(), "ui-secret").unwrap());
    }

    #[tokio::test]
    async fn test_root_user_keeps_first_password() {
        let store = auth_store().await;
        let ctx = Context::background();
        store.ensure_root_user(&ctx, "first").await.unwrap();
        store.ensure_root_user(&ctx, "second").await.unwrap();

        let users = store.users();
        users.authenticate(&ctx, "root", "first").await.unwrap();
        assert!(users.authenticate(&ctx, "root", "second").await.is_err());
    }
}
