//! Users stored under their username.

use async_trait::async_trait;
use enseada_storage::FindQuery;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::client::KIND_INDEX;
use super::{DocumentGateway, DocumentKind};
use crate::password::SecretHasher;
use crate::storage::{Authenticator, UserStorage};
use crate::types::User;
use crate::{AuthError, AuthResult, Context};

const LABEL: &str = "user";

/// Stored shape of a user. The plaintext password has no field here.
#[derive(Debug, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id")]
    username: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    kind: DocumentKind,
    hashed_password: String,
}

impl From<UserDocument> for User {
    fn from(doc: UserDocument) -> Self {
        Self {
            username: doc.username,
            rev: doc.rev,
            hashed_password: Some(doc.hashed_password),
            password: None,
        }
    }
}

/// [`UserStorage`] and [`Authenticator`] over the users database.
#[derive(Debug, Clone)]
pub struct DocumentUserStorage {
    gateway: DocumentGateway,
    hasher: SecretHasher,
}

impl DocumentUserStorage {
    pub fn new(gateway: DocumentGateway, hasher: SecretHasher) -> Self {
        Self { gateway, hasher }
    }

    /// Hashes a pending plaintext password into `user` and clears it.
    ///
    /// Returns the hash to persist. `user` is left untouched on error.
    async fn take_password(&self, user: &mut User) -> AuthResult<String> {
        match user.password.as_deref() {
            Some(password) if !password.is_empty() => {
                let hashed = self.hasher.hash_async(password).await?;
                user.hashed_password = Some(hashed.clone());
                user.password = None;
                Ok(hashed)
            }
            _ => user
                .hashed_password
                .clone()
                .ok_or_else(|| AuthError::validation("user password cannot be blank")),
        }
    }

    fn document(user: &User, hashed_password: String) -> AuthResult<serde_json::Value> {
        let doc = UserDocument {
            username: user.username.clone(),
            rev: None,
            kind: DocumentKind::User,
            hashed_password,
        };
        Ok(serde_json::to_value(doc)?)
    }
}

#[async_trait]
impl UserStorage for DocumentUserStorage {
    #[tracing::instrument(level = "debug", skip_all, fields(username = %user.username))]
    async fn save_user(&self, ctx: &Context, user: &mut User) -> AuthResult<()> {
        if user.username.trim().is_empty() {
            return Err(AuthError::validation("username cannot be blank"));
        }
        let hashed = self.take_password(user).await?;
        let rev = self
            .gateway
            .put(ctx, &user.username, Self::document(user, hashed)?)
            .await?;
        user.rev = Some(rev);
        Ok(())
    }

    async fn get_user(&self, ctx: &Context, username: &str) -> AuthResult<Option<User>> {
        match self.gateway.get(ctx, username).await {
            Ok(doc) => {
                let doc: UserDocument = serde_json::from_value(doc)?;
                Ok(Some(doc.into()))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(username = %user.username))]
    async fn update_user(&self, ctx: &Context, user: &mut User) -> AuthResult<()> {
        let hashed = self.take_password(user).await?;
        let body = Self::document(user, hashed)?;
        let rev = self
            .gateway
            .put_revisioned(ctx, &user.username, body, user.rev.as_deref())
            .await?;
        user.rev = Some(rev);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(username = %user.username))]
    async fn delete_user(&self, ctx: &Context, user: &mut User) -> AuthResult<()> {
        let rev = match user.rev.clone() {
            Some(rev) => rev,
            None => self
                .gateway
                .current_rev(ctx, &user.username)
                .await?
                .ok_or_else(|| AuthError::not_found(LABEL))?,
        };
        match self.gateway.delete(ctx, &user.username, &rev).await {
            Ok(_) => {
                user.rev = None;
                Ok(())
            }
            Err(err) if err.is_not_found() => Err(AuthError::not_found(LABEL)),
            Err(err) => Err(err),
        }
    }

    async fn list_users(&self, ctx: &Context) -> AuthResult<Vec<User>> {
        let query =
            FindQuery::new(json!({ "kind": DocumentKind::User.as_str() })).use_index(KIND_INDEX);
        self.gateway
            .find_all(ctx, query)
            .await?
            .into_iter()
            .map(|doc| Ok(serde_json::from_value::<UserDocument>(doc)?.into()))
            .collect()
    }
}

#[async_trait]
impl Authenticator for DocumentUserStorage {
    #[tracing::instrument(level = "debug", skip(self, ctx, password))]
    async fn authenticate(
        &self,
        ctx: &Context,
        username: &str,
        password: &str,
    ) -> AuthResult<User> {
        let user = self.get_user(ctx, username).await?;
        let hash = user.as_ref().and_then(|u| u.hashed_password.as_deref());
        if self.hasher.verify_async(password, hash).await? {
            if let Some(user) = user {
                return Ok(user);
            }
        }
        tracing::debug!("authentication failed");
        Err(AuthError::InvalidCredentials)
    }
}
