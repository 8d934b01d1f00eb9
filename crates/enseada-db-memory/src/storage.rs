use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use enseada_storage::{
    ChangeRecord, ChangeStream, ChangesSince, DocumentMeta, DocumentStore, FindQuery,
    ID_FIELD, IndexDefinition, REV_FIELD, StorageError, StorageResult, doc_id, doc_rev,
    revision_generation,
};
use futures_util::StreamExt;
use futures_util::stream;
use papaya::HashMap as PapayaHashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::query;

/// Default capacity of each database's live change channel.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// In-memory document store.
///
/// Cloning the store yields another handle onto the same databases, the way
/// two server replicas talk to one database cluster.
///
/// Each database keeps its full change log for replay and never compacts it,
/// so memory grows with every write. Meant for tests and single-node development.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    databases: Arc<PapayaHashMap<String, Arc<MemoryDatabase>>>,
    feed_capacity: usize,
}

struct MemoryDatabase {
    state: Mutex<DatabaseState>,
}

struct DatabaseState {
    docs: HashMap<String, StoredDocument>,
    seq: u64,
    log: Vec<ChangeRecord>,
    indexes: BTreeMap<String, IndexDefinition>,
    feed: broadcast::Sender<ChangeRecord>,
}

struct StoredDocument {
    rev: String,
    /// `None` marks a tombstone.
    body: Option<Value>,
}

impl StoredDocument {
    fn is_live(&self) -> bool {
        self.body.is_some()
    }
}

impl DatabaseState {
    fn new(feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity);
        Self {
            docs: HashMap::new(),
            seq: 0,
            log: Vec::new(),
            indexes: BTreeMap::new(),
            feed,
        }
    }

    /// Stores a new revision and appends it to the change log.
    fn commit(&mut self, id: &str, previous: Option<&str>, body: Option<Value>) -> String {
        let generation = previous.and_then(revision_generation).unwrap_or(0) + 1;
        let rev = next_revision(generation);
        let deleted = body.is_none();
        let body = body.map(|mut doc| {
            if let Value::Object(map) = &mut doc {
                map.insert(ID_FIELD.into(), Value::String(id.to_string()));
                map.insert(REV_FIELD.into(), Value::String(rev.clone()));
            }
            doc
        });
        self.docs.insert(
            id.to_string(),
            StoredDocument {
                rev: rev.clone(),
                body,
            },
        );

        self.seq += 1;
        let record = ChangeRecord {
            seq: self.seq.to_string(),
            id: id.to_string(),
            rev: rev.clone(),
            deleted,
        };
        self.log.push(record.clone());
        // Err only means nobody is subscribed.
        let _ = self.feed.send(record);
        rev
    }
}

fn next_revision(generation: u64) -> String {
    format!("{generation}-{}", Uuid::new_v4().simple())
}

fn ensure_object(doc: &Value) -> StorageResult<()> {
    if doc.is_object() {
        Ok(())
    } else {
        Err(StorageError::invalid_document("document must be a JSON object"))
    }
}

impl InMemoryDocumentStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Creates a store whose live change channels hold `feed_capacity` records
    /// before slow subscribers start lagging.
    pub fn with_feed_capacity(feed_capacity: usize) -> Self {
        Self {
            databases: Arc::new(PapayaHashMap::new()),
            feed_capacity: feed_capacity.max(1),
        }
    }

    fn database(&self, db: &str) -> StorageResult<Arc<MemoryDatabase>> {
        let guard = self.databases.pin();
        guard
            .get(db)
            .cloned()
            .ok_or_else(|| StorageError::database_not_found(db))
    }

    /// Ends every open change feed subscription on `db`.
    ///
    /// Subscribers observe the end of their stream and must resubscribe.
    pub fn disconnect_feeds(&self, db: &str) -> StorageResult<()> {
        let database = self.database(db)?;
        let mut state = database.state.lock();
        let (feed, _) = broadcast::channel(self.feed_capacity);
        state.feed = feed;
        tracing::debug!(db, "change feed subscribers disconnected");
        Ok(())
    }

    /// Names of the indexes created on `db`.
    pub fn indexes(&self, db: &str) -> StorageResult<Vec<String>> {
        let database = self.database(db)?;
        let state = database.state.lock();
        Ok(state.indexes.keys().cloned().collect())
    }

    /// Number of live documents in `db`.
    pub fn document_count(&self, db: &str) -> StorageResult<usize> {
        let database = self.database(db)?;
        let state = database.state.lock();
        Ok(state.docs.values().filter(|d| d.is_live()).count())
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDocumentStore")
            .field("databases", &self.databases.len())
            .field("feed_capacity", &self.feed_capacity)
            .finish()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_database(&self, db: &str) -> StorageResult<bool> {
        if db.is_empty() {
            return Err(StorageError::invalid_document("database name cannot be empty"));
        }
        let guard = self.databases.pin();
        let database = Arc::new(MemoryDatabase {
            state: Mutex::new(DatabaseState::new(self.feed_capacity)),
        });
        Ok(guard.try_insert(db.to_string(), database).is_ok())
    }

    async fn database_exists(&self, db: &str) -> StorageResult<bool> {
        Ok(self.databases.pin().contains_key(db))
    }

    async fn create_index(&self, db: &str, index: &IndexDefinition) -> StorageResult<()> {
        if index.fields.is_empty() {
            return Err(StorageError::invalid_query("index must list at least one field"));
        }
        let database = self.database(db)?;
        database
            .state
            .lock()
            .indexes
            .insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn create_doc(&self, db: &str, doc: Value) -> StorageResult<DocumentMeta> {
        ensure_object(&doc)?;
        let id = doc_id(&doc)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let database = self.database(db)?;
        let mut state = database.state.lock();

        let previous = match state.docs.get(&id) {
            Some(existing) if existing.is_live() => {
                return Err(StorageError::conflict(db, id));
            }
            Some(tombstone) => Some(tombstone.rev.clone()),
            None => None,
        };
        let rev = state.commit(&id, previous.as_deref(), Some(doc));
        Ok(DocumentMeta { id, rev })
    }

    async fn put(&self, db: &str, id: &str, doc: Value) -> StorageResult<String> {
        ensure_object(&doc)?;
        let supplied = doc_rev(&doc).map(str::to_string);
        let database = self.database(db)?;
        let mut state = database.state.lock();

        let previous = match (state.docs.get(id), supplied.as_deref()) {
            (Some(existing), Some(rev)) if existing.rev == rev => Some(existing.rev.clone()),
            (Some(existing), None) if !existing.is_live() => Some(existing.rev.clone()),
            (None, None) => None,
            _ => return Err(StorageError::conflict(db, id)),
        };
        Ok(state.commit(id, previous.as_deref(), Some(doc)))
    }

    async fn get(&self, db: &str, id: &str) -> StorageResult<Value> {
        let database = self.database(db)?;
        let state = database.state.lock();
        state
            .docs
            .get(id)
            .and_then(|d| d.body.clone())
            .ok_or_else(|| StorageError::not_found(db, id))
    }

    async fn get_meta(&self, db: &str, id: &str) -> StorageResult<String> {
        let database = self.database(db)?;
        let state = database.state.lock();
        state
            .docs
            .get(id)
            .filter(|d| d.is_live())
            .map(|d| d.rev.clone())
            .ok_or_else(|| StorageError::not_found(db, id))
    }

    async fn delete(&self, db: &str, id: &str, rev: &str) -> StorageResult<String> {
        let database = self.database(db)?;
        let mut state = database.state.lock();

        let current = match state.docs.get(id) {
            Some(existing) if existing.is_live() => existing.rev.clone(),
            _ => return Err(StorageError::not_found(db, id)),
        };
        if current != rev {
            return Err(StorageError::conflict(db, id));
        }
        Ok(state.commit(id, Some(&current), None))
    }

    async fn find(&self, db: &str, query: &FindQuery) -> StorageResult<Vec<Value>> {
        let database = self.database(db)?;
        let mut docs = {
            let state = database.state.lock();
            if let Some(index) = &query.use_index {
                if !state.indexes.contains_key(index) {
                    tracing::warn!(db, index = %index, "use_index names an unknown index");
                }
            }
            let mut live: Vec<(&String, &Value)> = state
                .docs
                .iter()
                .filter_map(|(id, d)| d.body.as_ref().map(|body| (id, body)))
                .collect();
            live.sort_by(|a, b| a.0.cmp(b.0));

            let mut matched = Vec::new();
            for (_, body) in live {
                if query::matches(&query.selector, body)? {
                    matched.push(body.clone());
                }
            }
            matched
        };

        query::sort_documents(&mut docs, &query.sort);
        let docs = docs
            .into_iter()
            .skip(query.skip.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|doc| match &query.fields {
                Some(fields) => query::project(&doc, fields),
                None => doc,
            })
            .collect();
        Ok(docs)
    }

    async fn changes(&self, db: &str, since: ChangesSince) -> StorageResult<ChangeStream> {
        let database = self.database(db)?;
        let (backlog, receiver) = {
            let state = database.state.lock();
            let after = match &since {
                ChangesSince::Now => state.seq,
                ChangesSince::Beginning => 0,
                ChangesSince::Seq(seq) => seq.parse::<u64>().map_err(|_| {
                    StorageError::invalid_query(format!("malformed change sequence {seq}"))
                })?,
            };
            let backlog: Vec<ChangeRecord> = state
                .log
                .iter()
                .skip(after.min(state.seq) as usize)
                .cloned()
                .collect();
            // Subscribing under the lock keeps replay and live delivery gapless.
            (backlog, state.feed.subscribe())
        };

        let replay = stream::iter(backlog.into_iter().map(Ok));
        let live = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(record) => Some((Ok(record), receiver)),
                Err(RecvError::Lagged(skipped)) => Some((
                    Err(StorageError::connection(format!(
                        "change feed subscriber lagged by {skipped} records"
                    ))),
                    receiver,
                )),
                Err(RecvError::Closed) => None,
            }
        });
        Ok(replay.chain(live).boxed())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
