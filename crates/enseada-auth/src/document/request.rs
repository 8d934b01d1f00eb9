//! Token sessions stored as correlated documents keyed by signature.

use async_trait::async_trait;
use enseada_storage::{FindQuery, SortField};
use serde_json::{Map, Value, json};

use super::{CorrelatedCollection, DocumentKind};
use crate::storage::RequestStorage;
use crate::types::{OAuthRequest, TokenType};
use crate::{AuthResult, Context};

/// Index over the `sig` field.
pub const SIGNATURE_INDEX: &str = "oauth_sigs_index";
/// Index over `req.id`.
pub const REQUEST_ID_INDEX: &str = "oauth_reqs_index";
/// Descending index over `req.requested_at`.
pub const REQUESTED_AT_INDEX: &str = "oauth_requested_at_sort_index";

/// [`RequestStorage`] over the oauth database.
#[derive(Debug, Clone)]
pub struct DocumentRequestStorage {
    sessions: CorrelatedCollection,
}

impl DocumentRequestStorage {
    pub fn new(sessions: CorrelatedCollection) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl RequestStorage for DocumentRequestStorage {
    #[tracing::instrument(level = "debug", skip(self, ctx, request), fields(request_id = %request.id))]
    async fn create_request_session(
        &self,
        ctx: &Context,
        kind: TokenType,
        signature: &str,
        request: &OAuthRequest,
    ) -> AuthResult<String> {
        self.sessions
            .create(ctx, kind.into(), signature, request)
            .await
    }

    async fn get_request_session(
        &self,
        ctx: &Context,
        kind: TokenType,
        signature: &str,
    ) -> AuthResult<OAuthRequest> {
        let doc = self
            .sessions
            .find(ctx, kind.into(), signature, kind.label())
            .await?;
        Ok(doc.value)
    }

    async fn update_request_session(
        &self,
        ctx: &Context,
        kind: TokenType,
        signature: &str,
        request: &OAuthRequest,
        rev: Option<&str>,
    ) -> AuthResult<String> {
        self.sessions
            .update(ctx, kind.into(), signature, request, rev, kind.label())
            .await
    }

    #[tracing::instrument(level = "debug", skip(self, ctx))]
    async fn delete_request_session(
        &self,
        ctx: &Context,
        kind: TokenType,
        signature: &str,
    ) -> AuthResult<()> {
        self.sessions
            .delete(ctx, kind.into(), signature, kind.label())
            .await
    }

    #[tracing::instrument(level = "debug", skip(self, ctx))]
    async fn revoke_by_request_id(
        &self,
        ctx: &Context,
        kind: TokenType,
        request_id: &str,
    ) -> AuthResult<usize> {
        let selector = json!({
            "kind": DocumentKind::from(kind).as_str(),
            "req.id": request_id,
        });
        let revoked = self.sessions.delete_matching(ctx, selector).await?;
        tracing::debug!(revoked, "revoked token sessions");
        Ok(revoked)
    }

    async fn list_request_sessions(
        &self,
        ctx: &Context,
        kind: TokenType,
        client_id: Option<&str>,
    ) -> AuthResult<Vec<OAuthRequest>> {
        let mut selector = Map::new();
        selector.insert("kind".into(), json!(DocumentKind::from(kind).as_str()));
        selector.insert("req.requested_at".into(), json!({ "$gt": null }));
        if let Some(client_id) = client_id {
            selector.insert("req.client_id".into(), json!(client_id));
        }
        let query = FindQuery::new(Value::Object(selector))
            .sort(SortField::desc("req.requested_at"))
            .use_index(REQUESTED_AT_INDEX);

        let docs = self.sessions.list::<OAuthRequest>(ctx, query).await?;
        Ok(docs.into_iter().map(|doc| doc.value).collect())
    }
}
