//! PKCE sessions stored as correlated documents keyed by signature.

use async_trait::async_trait;

use super::{CorrelatedCollection, DocumentKind};
use crate::storage::PkceRequestStorage;
use crate::types::OAuthRequest;
use crate::{AuthResult, Context};

const LABEL: &str = "pkce request";

/// [`PkceRequestStorage`] over the oauth database.
#[derive(Debug, Clone)]
pub struct DocumentPkceRequestStorage {
    sessions: CorrelatedCollection,
}

impl DocumentPkceRequestStorage {
    pub fn new(sessions: CorrelatedCollection) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl PkceRequestStorage for DocumentPkceRequestStorage {
    async fn create_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &str,
        request: &OAuthRequest,
    ) -> AuthResult<String> {
        self.sessions
            .create(ctx, DocumentKind::PkceRequest, signature, request)
            .await
    }

    async fn get_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &str,
    ) -> AuthResult<OAuthRequest> {
        let doc = self
            .sessions
            .find(ctx, DocumentKind::PkceRequest, signature, LABEL)
            .await?;
        Ok(doc.value)
    }

    async fn update_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &str,
        request: &OAuthRequest,
        rev: Option<&str>,
    ) -> AuthResult<String> {
        self.sessions
            .update(ctx, DocumentKind::PkceRequest, signature, request, rev, LABEL)
            .await
    }

    #[tracing::instrument(level = "debug", skip(self, ctx))]
    async fn delete_pkce_request_session(&self, ctx: &Context, signature: &str) -> AuthResult<()> {
        self.sessions
            .delete(ctx, DocumentKind::PkceRequest, signature, LABEL)
            .await
    }
}
