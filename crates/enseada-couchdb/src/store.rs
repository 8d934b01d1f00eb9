use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use enseada_storage::{
    ChangeRecord, ChangeStream, ChangesSince, DocumentMeta, DocumentStore, FindQuery,
    IndexDefinition, StorageError, StorageResult,
};
use futures_util::StreamExt;
use futures_util::stream;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::config::CouchConfig;
use crate::responses::{
    ChangesResponse, ErrorBody, FindResponse, WriteResponse, seq_to_string,
};

/// [`DocumentStore`] over the CouchDB HTTP API.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct CouchDocumentStore {
    http: Client,
    base_url: Url,
    username: String,
    password: Option<String>,
    changes_timeout: Duration,
    request_timeout: Duration,
}

impl fmt::Debug for CouchDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CouchDocumentStore")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn transport_error(err: reqwest::Error) -> StorageError {
    StorageError::connection(err.to_string())
}

impl CouchDocumentStore {
    /// Builds a client for the configured server. No request is made.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &CouchConfig) -> StorageResult<Self> {
        let base_url = Url::parse(&config.url).map_err(|e| {
            StorageError::connection(format!("invalid CouchDB url '{}': {e}", config.url))
        })?;
        let http = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            http,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            changes_timeout: config.changes_timeout,
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, segments: &[&str]) -> StorageResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::internal("CouchDB URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> StorageResult<RequestBuilder> {
        let url = self.url(segments)?;
        Ok(self
            .http
            .request(method, url)
            .basic_auth(&self.username, self.password.as_ref())
            .timeout(self.request_timeout))
    }

    async fn send(&self, db: &str, id: &str, request: RequestBuilder) -> StorageResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(status_error(db, id, response).await)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        db: &str,
        id: &str,
        request: RequestBuilder,
    ) -> StorageResult<T> {
        let response = self.send(db, id, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| StorageError::serialization(e.to_string()))
    }

    async fn poll_changes(&self, db: &str, since: &str) -> StorageResult<ChangesResponse> {
        let timeout_ms = self.changes_timeout.as_millis().to_string();
        let request = self
            .request(Method::GET, &[db, "_changes"])?
            .query(&[("feed", "longpoll"), ("since", since), ("timeout", timeout_ms.as_str())])
            // The server holds the request open for up to `changes_timeout`.
            .timeout(self.changes_timeout + self.request_timeout);
        self.send_json(db, "", request).await
    }
}

/// Translates a non-success response into a storage error.
async fn status_error(db: &str, id: &str, response: Response) -> StorageError {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
        error: String::new(),
        reason: String::new(),
    });
    tracing::debug!(db, id, %status, error = %body.error, reason = %body.reason, "CouchDB request failed");

    match status {
        StatusCode::NOT_FOUND if id.is_empty() || body.reason == "Database does not exist." => {
            StorageError::database_not_found(db)
        }
        StatusCode::NOT_FOUND => StorageError::not_found(db, id),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => StorageError::conflict(db, id),
        StatusCode::BAD_REQUEST => StorageError::invalid_query(body.reason),
        s if s.is_server_error() => {
            StorageError::connection(format!("CouchDB returned {s}: {}", body.reason))
        }
        s => StorageError::internal(format!("CouchDB returned {s}: {} {}", body.error, body.reason)),
    }
}

struct FeedState {
    store: CouchDocumentStore,
    db: String,
    since: String,
    buffer: VecDeque<ChangeRecord>,
    failed: bool,
}

#[async_trait]
impl DocumentStore for CouchDocumentStore {
    async fn create_database(&self, db: &str) -> StorageResult<bool> {
        tracing::debug!(db, "creating database");
        let request = self.request(Method::PUT, &[db])?;
        match self.send(db, "", request).await {
            Ok(_) => Ok(true),
            Err(StorageError::Conflict { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn database_exists(&self, db: &str) -> StorageResult<bool> {
        let response = self
            .request(Method::HEAD, &[db])?
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(db, "", response).await),
        }
    }

    async fn create_index(&self, db: &str, index: &IndexDefinition) -> StorageResult<()> {
        tracing::debug!(db, index = %index.name, "creating index");
        let request = self
            .request(Method::POST, &[db, "_index"])?
            .json(&index.to_mango());
        self.send(db, "", request).await?;
        Ok(())
    }

    async fn create_doc(&self, db: &str, doc: Value) -> StorageResult<DocumentMeta> {
        if !doc.is_object() {
            return Err(StorageError::invalid_document("document must be a JSON object"));
        }
        let id = enseada_storage::doc_id(&doc).unwrap_or_default().to_string();
        let request = self.request(Method::POST, &[db])?.json(&doc);
        let written: WriteResponse = self.send_json(db, &id, request).await?;
        Ok(DocumentMeta {
            id: written.id,
            rev: written.rev,
        })
    }

    async fn put(&self, db: &str, id: &str, doc: Value) -> StorageResult<String> {
        if !doc.is_object() {
            return Err(StorageError::invalid_document("document must be a JSON object"));
        }
        let request = self.request(Method::PUT, &[db, id])?.json(&doc);
        let written: WriteResponse = self.send_json(db, id, request).await?;
        Ok(written.rev)
    }

    async fn get(&self, db: &str, id: &str) -> StorageResult<Value> {
        let request = self.request(Method::GET, &[db, id])?;
        self.send_json(db, id, request).await
    }

    async fn get_meta(&self, db: &str, id: &str) -> StorageResult<String> {
        let request = self.request(Method::HEAD, &[db, id])?;
        let response = request.send().await.map_err(transport_error)?;
        match response.status() {
            s if s.is_success() => response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|etag| etag.trim_matches('"').to_string())
                .ok_or_else(|| StorageError::internal("CouchDB response is missing the ETag header")),
            // HEAD responses carry no body to tell a missing database apart.
            StatusCode::NOT_FOUND => Err(StorageError::not_found(db, id)),
            _ => Err(status_error(db, id, response).await),
        }
    }

    async fn delete(&self, db: &str, id: &str, rev: &str) -> StorageResult<String> {
        let request = self.request(Method::DELETE, &[db, id])?.query(&[("rev", rev)]);
        let written: WriteResponse = self.send_json(db, id, request).await?;
        Ok(written.rev)
    }

    async fn find(&self, db: &str, query: &FindQuery) -> StorageResult<Vec<Value>> {
        let request = self
            .request(Method::POST, &[db, "_find"])?
            .json(&query.to_mango());
        let found: FindResponse = self.send_json(db, "", request).await?;
        if let Some(warning) = found.warning {
            tracing::warn!(db, %warning, "CouchDB _find warning");
        }
        Ok(found.docs)
    }

    async fn changes(&self, db: &str, since: ChangesSince) -> StorageResult<ChangeStream> {
        if !self.database_exists(db).await? {
            return Err(StorageError::database_not_found(db));
        }

        let state = FeedState {
            store: self.clone(),
            db: db.to_string(),
            since: since.as_param().to_string(),
            buffer: VecDeque::new(),
            failed: false,
        };
        let feed = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(record) = state.buffer.pop_front() {
                    return Some((Ok(record), state));
                }
                if state.failed {
                    return None;
                }
                match state.store.poll_changes(&state.db, &state.since).await {
                    Ok(page) => {
                        state.since = seq_to_string(&page.last_seq);
                        state.buffer.extend(page.results.into_iter().filter_map(|change| {
                            let rev = change.changes.into_iter().next()?.rev;
                            Some(ChangeRecord {
                                seq: seq_to_string(&change.seq),
                                id: change.id,
                                rev,
                                deleted: change.deleted,
                            })
                        }));
                    }
                    Err(e) => {
                        // Yield the error once, then end the stream.
                        state.failed = true;
                        return Some((Err(e), state));
                    }
                }
            }
        });
        Ok(feed.boxed())
    }

    fn backend_name(&self) -> &'static str {
        "couchdb"
    }
}
