//! OIDC sessions stored as correlated documents keyed by authorization code.

use async_trait::async_trait;

use super::{CorrelatedCollection, DocumentKind};
use crate::storage::OpenIdConnectSessionStorage;
use crate::types::OAuthRequest;
use crate::{AuthResult, Context};

/// Index over the `auth_code` field.
pub const AUTH_CODE_INDEX: &str = "openid_reqs_index";

const LABEL: &str = "openid session";

/// [`OpenIdConnectSessionStorage`] over the oauth database.
#[derive(Debug, Clone)]
pub struct DocumentOpenIdConnectSessionStorage {
    sessions: CorrelatedCollection,
}

impl DocumentOpenIdConnectSessionStorage {
    pub fn new(sessions: CorrelatedCollection) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl OpenIdConnectSessionStorage for DocumentOpenIdConnectSessionStorage {
    async fn create_open_id_connect_session(
        &self,
        ctx: &Context,
        auth_code: &str,
        request: &OAuthRequest,
    ) -> AuthResult<String> {
        self.sessions
            .create(ctx, DocumentKind::OpenIdSession, auth_code, request)
            .await
    }

    async fn get_open_id_connect_session(
        &self,
        ctx: &Context,
        auth_code: &str,
    ) -> AuthResult<OAuthRequest> {
        let doc = self
            .sessions
            .find(ctx, DocumentKind::OpenIdSession, auth_code, LABEL)
            .await?;
        Ok(doc.value)
    }

    async fn update_open_id_connect_session(
        &self,
        ctx: &Context,
        auth_code: &str,
        request: &OAuthRequest,
        rev: Option<&str>,
    ) -> AuthResult<String> {
        self.sessions
            .update(ctx, DocumentKind::OpenIdSession, auth_code, request, rev, LABEL)
            .await
    }

    async fn delete_open_id_connect_session(
        &self,
        ctx: &Context,
        auth_code: &str,
    ) -> AuthResult<()> {
        self.sessions
            .delete(ctx, DocumentKind::OpenIdSession, auth_code, LABEL)
            .await
    }
}
