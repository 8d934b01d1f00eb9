//! OAuth clients stored under their client id.

use async_trait::async_trait;
use enseada_storage::FindQuery;
use serde_json::{Value, json};

use super::{DocumentGateway, DocumentKind, identity, with_identity};
use crate::storage::ClientStorage;
use crate::types::OAuthClient;
use crate::{AuthError, AuthResult, Context};

/// Index over the `kind` field.
pub const KIND_INDEX: &str = "kind_index";

const LABEL: &str = "client";

/// [`ClientStorage`] over the oauth database.
#[derive(Debug, Clone)]
pub struct DocumentClientStorage {
    gateway: DocumentGateway,
}

impl DocumentClientStorage {
    pub fn new(gateway: DocumentGateway) -> Self {
        Self { gateway }
    }

    fn encode(client: &OAuthClient) -> AuthResult<Value> {
        let mut body = serde_json::to_value(client)?;
        if let Some(object) = body.as_object_mut() {
            object.insert("kind".into(), json!(DocumentKind::OAuthClient.as_str()));
        }
        Ok(body)
    }

    fn decode(doc: Value) -> AuthResult<OAuthClient> {
        if doc.get("kind").and_then(Value::as_str) != Some(DocumentKind::OAuthClient.as_str()) {
            return Err(AuthError::not_found(LABEL));
        }
        let (_, rev) = identity(&doc)?;
        let mut client: OAuthClient = serde_json::from_value(doc)?;
        client.rev = Some(rev);
        Ok(client)
    }
}

#[async_trait]
impl ClientStorage for DocumentClientStorage {
    #[tracing::instrument(level = "debug", skip_all, fields(client_id = %client.id))]
    async fn create_client(&self, ctx: &Context, client: &mut OAuthClient) -> AuthResult<()> {
        let body = with_identity(Self::encode(client)?, &client.id, None)?;
        let rev = self.gateway.put(ctx, &client.id, body).await?;
        client.rev = Some(rev);
        Ok(())
    }

    async fn get_client(&self, ctx: &Context, id: &str) -> AuthResult<OAuthClient> {
        match self.gateway.get(ctx, id).await {
            Ok(doc) => Self::decode(doc),
            Err(err) if err.is_not_found() => Err(AuthError::not_found(LABEL)),
            Err(err) => Err(err),
        }
    }

    async fn update_client(&self, ctx: &Context, client: &mut OAuthClient) -> AuthResult<()> {
        let body = Self::encode(client)?;
        let rev = self
            .gateway
            .put_revisioned(ctx, &client.id, body, client.rev.as_deref())
            .await?;
        client.rev = Some(rev);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx))]
    async fn delete_client(&self, ctx: &Context, id: &str) -> AuthResult<()> {
        let client = self.get_client(ctx, id).await?;
        let rev = client.rev.ok_or_else(|| AuthError::not_found(LABEL))?;
        match self.gateway.delete(ctx, id, &rev).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Err(AuthError::not_found(LABEL)),
            Err(err) => Err(err),
        }
    }

    async fn list_clients(&self, ctx: &Context) -> AuthResult<Vec<OAuthClient>> {
        let query = FindQuery::new(json!({ "kind": DocumentKind::OAuthClient.as_str() }))
            .use_index(KIND_INDEX);
        self.gateway
            .find_all(ctx, query)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use enseada_db_memory::InMemoryDocumentStore;
    use enseada_storage::DocumentStore;

    use super::*;
    use crate::config::PasswordConfig;
    use crate::password::SecretHasher;

    async fn storage() -> DocumentClientStorage {
        let store = InMemoryDocumentStore::new();
        store.create_database("oauth").await.unwrap();
        DocumentClientStorage::new(DocumentGateway::new(Arc::new(store), "oauth", None))
    }

    fn client(id: &str) -> OAuthClient {
        let hasher = SecretHasher::new(&PasswordConfig::for_testing()).unwrap();
        OAuthClient::builder(id)
            .secret("s3cr3t")
            .redirect_uris(["http://localhost:9623/ui/callback"])
            .build(&hasher)
            .unwrap()
    }

    #[tokio::test]
    async fn test_client_lifecycle() {
        let storage = storage().await;
        let ctx = Context::background();

        let mut created = client("enseada");
        storage.create_client(&ctx, &mut created).await.unwrap();
        assert!(created.rev.is_some());

        let mut fetched = storage.get_client(&ctx, "enseada").await.unwrap();
        assert_eq!(fetched, created);

        fetched.scopes = vec!["profile".to_string()];
        storage.update_client(&ctx, &mut fetched).await.unwrap();
        assert_ne!(fetched.rev, created.rev);

        let err = storage.update_client(&ctx, &mut created).await.unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(storage.list_clients(&ctx).await.unwrap().len(), 1);

        storage.delete_client(&ctx, "enseada").await.unwrap();
        let err = storage.get_client(&ctx, "enseada").await.unwrap_err();
        assert_eq!(err.to_string(), "client not found");
    }

    #[tokio::test]
    async fn test_duplicate_client_conflicts() {
        let storage = storage().await;
        let ctx = Context::background();
        storage.create_client(&ctx, &mut client("cli")).await.unwrap();
        let err = storage
            .create_client(&ctx, &mut client("cli"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_without_rev_fetches_it() {
        let storage = storage().await;
        let ctx = Context::background();
        storage.create_client(&ctx, &mut client("cli")).await.unwrap();

        let mut blind = client("cli");
        blind.audiences = vec!["api".to_string()];
        storage.update_client(&ctx, &mut blind).await.unwrap();
        assert_eq!(
            storage.get_client(&ctx, "cli").await.unwrap().audiences,
            vec!["api"]
        );
    }
}
