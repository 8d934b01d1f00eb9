//! Document store backed implementations of the persistence ports.
//!
//! Every entity is stored as a JSON document tagged with a `kind`. Writes
//! carry the revision last observed by the writer; the store rejects stale
//! writes with a conflict, which is surfaced as [`AuthError::Conflict`].

pub mod client;
pub mod correlated;
pub mod oidc;
pub mod pkce;
pub mod request;
pub mod store;
pub mod user;

use std::future::Future;
use std::time::Duration;

use enseada_storage::{
    DocumentMeta, DynDocumentStore, FindQuery, ID_FIELD, REV_FIELD, StorageResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TokenType;
use crate::{AuthError, AuthResult, Context};

pub use client::DocumentClientStorage;
pub use correlated::CorrelatedCollection;
pub use oidc::DocumentOpenIdConnectSessionStorage;
pub use pkce::DocumentPkceRequestStorage;
pub use request::DocumentRequestStorage;
pub use store::AuthStore;
pub use user::DocumentUserStorage;

/// Page size used when reading every document matching a selector.
pub(crate) const PAGE_SIZE: usize = 500;

/// Value of the `kind` field of each stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    #[serde(rename = "oauth_client")]
    OAuthClient,
    #[serde(rename = "authorize_code")]
    AuthorizeCode,
    #[serde(rename = "access_token")]
    AccessToken,
    #[serde(rename = "refresh_token")]
    RefreshToken,
    #[serde(rename = "openid_session")]
    OpenIdSession,
    #[serde(rename = "pkce_request")]
    PkceRequest,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "policy_rule")]
    PolicyRule,
}

impl DocumentKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OAuthClient => "oauth_client",
            Self::AuthorizeCode => "authorize_code",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::OpenIdSession => "openid_session",
            Self::PkceRequest => "pkce_request",
            Self::User => "user",
            Self::PolicyRule => "policy_rule",
        }
    }
}

impl From<TokenType> for DocumentKind {
    fn from(kind: TokenType) -> Self {
        match kind {
            TokenType::AuthorizeCode => Self::AuthorizeCode,
            TokenType::AccessToken => Self::AccessToken,
            TokenType::RefreshToken => Self::RefreshToken,
        }
    }
}

/// One logical database of a shared document store.
///
/// Wraps every store call in the caller's [`Context`] (plus the configured
/// per-request timeout) and translates store errors into [`AuthError`].
#[derive(Clone)]
pub struct DocumentGateway {
    store: DynDocumentStore,
    db: String,
    request_timeout: Option<Duration>,
}

impl DocumentGateway {
    pub fn new(store: DynDocumentStore, db: impl Into<String>, request_timeout: Option<Duration>) -> Self {
        Self {
            store,
            db: db.into(),
            request_timeout,
        }
    }

    #[must_use]
    pub fn db(&self) -> &str {
        &self.db
    }

    #[must_use]
    pub fn store(&self) -> &DynDocumentStore {
        &self.store
    }

    /// Runs one store call under the context.
    pub async fn call<T, F>(&self, ctx: &Context, fut: F) -> AuthResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        let ctx = match self.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };
        ctx.run(async move { fut.await.map_err(AuthError::from) })
            .await
    }

    pub async fn create_doc(&self, ctx: &Context, doc: Value) -> AuthResult<DocumentMeta> {
        self.call(ctx, self.store.create_doc(&self.db, doc)).await
    }

    pub async fn get(&self, ctx: &Context, id: &str) -> AuthResult<Value> {
        self.call(ctx, self.store.get(&self.db, id)).await
    }

    pub async fn put(&self, ctx: &Context, id: &str, doc: Value) -> AuthResult<String> {
        self.call(ctx, self.store.put(&self.db, id, doc)).await
    }

    pub async fn delete(&self, ctx: &Context, id: &str, rev: &str) -> AuthResult<String> {
        self.call(ctx, self.store.delete(&self.db, id, rev)).await
    }

    pub async fn find(&self, ctx: &Context, query: &FindQuery) -> AuthResult<Vec<Value>> {
        self.call(ctx, self.store.find(&self.db, query)).await
    }

    /// Current revision of a document, `None` if it does not exist.
    pub async fn current_rev(&self, ctx: &Context, id: &str) -> AuthResult<Option<String>> {
        match self.call(ctx, self.store.get_meta(&self.db, id)).await {
            Ok(rev) => Ok(Some(rev)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The single document matching the query.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` labelled with `label` for zero matches and a
    /// `Storage` error when the selector matches more than one document.
    pub async fn find_one(&self, ctx: &Context, query: FindQuery, label: &str) -> AuthResult<Value> {
        let mut docs = self.find(ctx, &query.limit(2)).await?;
        match docs.len() {
            0 => Err(AuthError::not_found(label)),
            1 => Ok(docs.remove(0)),
            n => Err(AuthError::storage(format!(
                "ambiguous {label} lookup: selector matched {n} documents in {}",
                self.db
            ))),
        }
    }

    /// Every document matching the query, read page by page.
    pub async fn find_all(&self, ctx: &Context, query: FindQuery) -> AuthResult<Vec<Value>> {
        let mut docs = Vec::new();
        let mut skip = query.skip.unwrap_or(0);
        loop {
            let page = self
                .find(ctx, &query.clone().skip(skip).limit(PAGE_SIZE))
                .await?;
            let fetched = page.len();
            docs.extend(page);
            if fetched < PAGE_SIZE {
                return Ok(docs);
            }
            skip += fetched;
        }
    }

    /// Writes `body` as document `id`.
    ///
    /// A supplied `rev` is used as is, so a stale one surfaces `Conflict`.
    /// Without one the current revision is fetched first, and a write that
    /// loses a race is retried once with a freshly fetched revision; a second
    /// conflict is returned to the caller.
    pub async fn put_revisioned(
        &self,
        ctx: &Context,
        id: &str,
        body: Value,
        rev: Option<&str>,
    ) -> AuthResult<String> {
        if let Some(rev) = rev {
            return self.put(ctx, id, with_identity(body, id, Some(rev))?).await;
        }

        let current = self.current_rev(ctx, id).await?;
        match self
            .put(ctx, id, with_identity(body.clone(), id, current.as_deref())?)
            .await
        {
            Err(err) if err.is_conflict() => {
                tracing::debug!(db = %self.db, id, "write lost a revision race, retrying once");
                let current = self.current_rev(ctx, id).await?;
                self.put(ctx, id, with_identity(body, id, current.as_deref())?)
                    .await
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for DocumentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentGateway")
            .field("backend", &self.store.backend_name())
            .field("db", &self.db)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Sets `_id` and `_rev` (or removes a stale `_rev`) on a document body.
pub(crate) fn with_identity(mut body: Value, id: &str, rev: Option<&str>) -> AuthResult<Value> {
    let object = body
        .as_object_mut()
        .ok_or_else(|| AuthError::serialization("document body must be a JSON object"))?;
    object.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    match rev {
        Some(rev) => {
            object.insert(REV_FIELD.to_string(), Value::String(rev.to_string()));
        }
        None => {
            object.remove(REV_FIELD);
        }
    }
    Ok(body)
}

/// `_id` and `_rev` of a document returned by the store.
pub(crate) fn identity(doc: &Value) -> AuthResult<(String, String)> {
    let id = enseada_storage::doc_id(doc)
        .ok_or_else(|| AuthError::serialization("stored document has no _id"))?;
    let rev = enseada_storage::doc_rev(doc)
        .ok_or_else(|| AuthError::serialization("stored document has no _rev"))?;
    Ok((id.to_string(), rev.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use enseada_db_memory::InMemoryDocumentStore;
    use enseada_storage::{
        ChangeStream, ChangesSince, DocumentStore, IndexDefinition, StorageError,
    };
    use serde_json::json;

    use super::*;

    /// Loses the first `lost_races` puts to a concurrent writer.
    struct RacingStore {
        inner: InMemoryDocumentStore,
        lost_races: usize,
        puts: AtomicUsize,
        meta_reads: AtomicUsize,
    }

    impl RacingStore {
        fn new(lost_races: usize) -> Self {
            Self {
                inner: InMemoryDocumentStore::new(),
                lost_races,
                puts: AtomicUsize::new(0),
                meta_reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for RacingStore {
        async fn create_database(&self, db: &str) -> StorageResult<bool> {
            self.inner.create_database(db).await
        }

        async fn database_exists(&self, db: &str) -> StorageResult<bool> {
            self.inner.database_exists(db).await
        }

        async fn create_index(&self, db: &str, index: &IndexDefinition) -> StorageResult<()> {
            self.inner.create_index(db, index).await
        }

        async fn create_doc(&self, db: &str, doc: Value) -> StorageResult<DocumentMeta> {
            self.inner.create_doc(db, doc).await
        }

        async fn put(&self, db: &str, id: &str, doc: Value) -> StorageResult<String> {
            if self.puts.fetch_add(1, Ordering::SeqCst) < self.lost_races {
                return Err(StorageError::conflict(db, id));
            }
            self.inner.put(db, id, doc).await
        }

        async fn get(&self, db: &str, id: &str) -> StorageResult<Value> {
            self.inner.get(db, id).await
        }

        async fn get_meta(&self, db: &str, id: &str) -> StorageResult<String> {
            self.meta_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_meta(db, id).await
        }

        async fn delete(&self, db: &str, id: &str, rev: &str) -> StorageResult<String> {
            self.inner.delete(db, id, rev).await
        }

        async fn find(&self, db: &str, query: &FindQuery) -> StorageResult<Vec<Value>> {
            self.inner.find(db, query).await
        }

        async fn changes(&self, db: &str, since: ChangesSince) -> StorageResult<ChangeStream> {
            self.inner.changes(db, since).await
        }

        fn backend_name(&self) -> &'static str {
            "racing"
        }
    }

    async fn racing_gateway(lost_races: usize) -> (Arc<RacingStore>, DocumentGateway) {
        let store = Arc::new(RacingStore::new(lost_races));
        store.create_database("users").await.unwrap();
        store
            .inner
            .put("users", "alice", json!({ "v": 0 }))
            .await
            .unwrap();
        let gw = DocumentGateway::new(store.clone(), "users", None);
        (store, gw)
    }

    async fn gateway() -> DocumentGateway {
        let store = InMemoryDocumentStore::new();
        store.create_database("oauth").await.unwrap();
        DocumentGateway::new(Arc::new(store), "oauth", None)
    }

    #[test]
    fn test_kind_serializes_as_string() {
        assert_eq!(
            serde_json::to_value(DocumentKind::PkceRequest).unwrap(),
            json!("pkce_request")
        );
        assert_eq!(DocumentKind::from(TokenType::RefreshToken).as_str(), "refresh_token");
    }

    #[tokio::test]
    async fn test_find_one_zero_one_many() {
        let gw = gateway().await;
        let ctx = Context::background();
        let query = || FindQuery::new(json!({ "sig": "a" }));

        let err = gw.find_one(&ctx, query(), "access token").await.unwrap_err();
        assert_eq!(err.to_string(), "access token not found");

        gw.create_doc(&ctx, json!({ "sig": "a" })).await.unwrap();
        assert_eq!(gw.find_one(&ctx, query(), "x").await.unwrap()["sig"], "a");

        gw.create_doc(&ctx, json!({ "sig": "a" })).await.unwrap();
        let err = gw.find_one(&ctx, query(), "x").await.unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_find_all_pages() {
        let gw = gateway().await;
        let ctx = Context::background();
        for i in 0..(PAGE_SIZE + 3) {
            gw.create_doc(&ctx, json!({ "kind": "user", "n": i })).await.unwrap();
        }
        let docs = gw
            .find_all(&ctx, FindQuery::new(json!({ "kind": "user" })))
            .await
            .unwrap();
        assert_eq!(docs.len(), PAGE_SIZE + 3);
    }

    #[tokio::test]
    async fn test_put_revisioned_fetches_missing_rev() {
        let gw = gateway().await;
        let ctx = Context::background();

        let first = gw.put_revisioned(&ctx, "doc", json!({ "v": 1 }), None).await.unwrap();
        let second = gw.put_revisioned(&ctx, "doc", json!({ "v": 2 }), None).await.unwrap();
        assert!(second.starts_with("2-"));

        let err = gw
            .put_revisioned(&ctx, "doc", json!({ "v": 3 }), Some(&first))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(gw.get(&ctx, "doc").await.unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn test_put_revisioned_retries_one_lost_race() {
        let (store, gw) = racing_gateway(1).await;
        let ctx = Context::background();

        let rev = gw
            .put_revisioned(&ctx, "alice", json!({ "v": 1 }), None)
            .await
            .unwrap();
        assert!(rev.starts_with("2-"));
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
        assert_eq!(store.meta_reads.load(Ordering::SeqCst), 2);
        assert_eq!(gw.get(&ctx, "alice").await.unwrap()["v"], 1);
    }

    #[tokio::test]
    async fn test_put_revisioned_surfaces_second_conflict() {
        let (store, gw) = racing_gateway(usize::MAX).await;
        let ctx = Context::background();

        let err = gw
            .put_revisioned(&ctx, "alice", json!({ "v": 1 }), None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
        assert_eq!(gw.get(&ctx, "alice").await.unwrap()["v"], 0);
    }

    #[tokio::test]
    async fn test_put_revisioned_with_rev_never_retries() {
        let (store, gw) = racing_gateway(1).await;
        let ctx = Context::background();
        let current = store.inner.get_meta("users", "alice").await.unwrap();

        let err = gw
            .put_revisioned(&ctx, "alice", json!({ "v": 1 }), Some(&current))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        assert_eq!(store.meta_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let gw = gateway().await;
        let ctx = Context::background();
        ctx.cancel();
        let err = gw.get(&ctx, "missing").await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!err.is_not_found());
    }
}
