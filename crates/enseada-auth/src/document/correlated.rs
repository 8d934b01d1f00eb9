//! Documents looked up by a correlation key rather than by id.
//!
//! Token sessions, PKCE requests and OIDC sessions are stored as
//! `{_id, _rev, kind, <key_field>: key, req: {...}}` where the id is assigned
//! by the store and `key_field` is `sig` or `auth_code`.

use enseada_storage::FindQuery;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{DocumentGateway, DocumentKind, identity};
use crate::{AuthError, AuthResult, Context};

/// Field holding the request payload.
const REQUEST_FIELD: &str = "req";

/// A set of documents keyed by one correlation field.
#[derive(Debug, Clone)]
pub struct CorrelatedCollection {
    gateway: DocumentGateway,
    key_field: &'static str,
    index: &'static str,
}

/// A stored correlated document.
#[derive(Debug, Clone)]
pub struct CorrelatedDocument<T> {
    pub id: String,
    pub rev: String,
    pub value: T,
}

impl CorrelatedCollection {
    pub fn new(gateway: DocumentGateway, key_field: &'static str, index: &'static str) -> Self {
        Self {
            gateway,
            key_field,
            index,
        }
    }

    #[must_use]
    pub fn gateway(&self) -> &DocumentGateway {
        &self.gateway
    }

    fn selector(&self, kind: DocumentKind, key: &str) -> Value {
        let mut selector = Map::new();
        selector.insert("kind".into(), Value::String(kind.as_str().into()));
        selector.insert(self.key_field.into(), Value::String(key.into()));
        Value::Object(selector)
    }

    fn body<T: Serialize>(&self, kind: DocumentKind, key: &str, value: &T) -> AuthResult<Value> {
        let mut body = Map::new();
        body.insert("kind".into(), Value::String(kind.as_str().into()));
        body.insert(self.key_field.into(), Value::String(key.into()));
        body.insert(REQUEST_FIELD.into(), serde_json::to_value(value)?);
        Ok(Value::Object(body))
    }

    /// Stores a new document. Returns its revision.
    pub async fn create<T: Serialize>(
        &self,
        ctx: &Context,
        kind: DocumentKind,
        key: &str,
        value: &T,
    ) -> AuthResult<String> {
        let body = self.body(kind, key, value)?;
        let meta = self.gateway.create_doc(ctx, body).await?;
        tracing::trace!(db = self.gateway.db(), kind = kind.as_str(), id = %meta.id, "created document");
        Ok(meta.rev)
    }

    /// The document stored under `key`.
    pub async fn find<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        kind: DocumentKind,
        key: &str,
        label: &str,
    ) -> AuthResult<CorrelatedDocument<T>> {
        let query = FindQuery::new(self.selector(kind, key)).use_index(self.index);
        let doc = self.gateway.find_one(ctx, query, label).await?;
        decode(doc)
    }

    /// Replaces the payload stored under `key`.
    pub async fn update<T: Serialize>(
        &self,
        ctx: &Context,
        kind: DocumentKind,
        key: &str,
        value: &T,
        rev: Option<&str>,
        label: &str,
    ) -> AuthResult<String> {
        let existing: CorrelatedDocument<Value> = self.find(ctx, kind, key, label).await?;
        let body = self.body(kind, key, value)?;
        self.gateway
            .put_revisioned(ctx, &existing.id, body, rev)
            .await
    }

    /// Finds the document under `key` and deletes it at the found revision.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no document carries the key, including when a
    /// concurrent delete removed it between lookup and delete.
    pub async fn delete(
        &self,
        ctx: &Context,
        kind: DocumentKind,
        key: &str,
        label: &str,
    ) -> AuthResult<()> {
        let existing: CorrelatedDocument<Value> = self.find(ctx, kind, key, label).await?;
        match self.gateway.delete(ctx, &existing.id, &existing.rev).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Err(AuthError::not_found(label)),
            Err(err) => Err(err),
        }
    }

    /// Every document matching the query.
    pub async fn list<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        query: FindQuery,
    ) -> AuthResult<Vec<CorrelatedDocument<T>>> {
        self.gateway
            .find_all(ctx, query)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Deletes every document matching the selector. Documents deleted
    /// concurrently are skipped. Returns how many this call deleted.
    pub async fn delete_matching(&self, ctx: &Context, selector: Value) -> AuthResult<usize> {
        let docs = self
            .gateway
            .find_all(ctx, FindQuery::new(selector).fields(["_id", "_rev"]))
            .await?;

        let mut deleted = 0;
        for doc in docs {
            let (id, rev) = identity(&doc)?;
            match self.gateway.delete(ctx, &id, &rev).await {
                Ok(_) => deleted += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }
}

fn decode<T: DeserializeOwned>(mut doc: Value) -> AuthResult<CorrelatedDocument<T>> {
    let (id, rev) = identity(&doc)?;
    let payload = doc
        .get_mut(REQUEST_FIELD)
        .map(Value::take)
        .ok_or_else(|| AuthError::serialization(format!("document {id} has no {REQUEST_FIELD} field")))?;
    Ok(CorrelatedDocument {
        id,
        rev,
        value: serde_json::from_value(payload)?,
    })
}
