//! Change feed watcher for the policy database.
//!
//! Each replica runs one watcher. It follows the acl database change feed
//! and turns every rule document change into a [`PolicyChange::Changed`]
//! notification, which the [`PolicyReloadService`](super::PolicyReloadService)
//! answers with a full reload. The watcher never writes to the store.
//!
//! A lost feed is resubscribed with exponential backoff from the last
//! sequence seen, so no change is skipped. Without a known sequence it
//! resubscribes from now and requests a [`PolicyChange::BulkReload`] to
//! cover whatever happened in between.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use enseada_storage::{ChangeStream, ChangesSince, DynDocumentStore};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::reload::{PolicyChange, PolicyChangeNotifier};
use crate::config::SyncConfig;
use crate::{AuthError, AuthResult};

/// Statistics about the watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Rule changes forwarded to the notifier.
    pub changes_observed: u64,
    /// Times the feed failed or ended.
    pub stream_errors: u64,
    /// Successful resubscriptions.
    pub reconnects: u64,
}

pub struct PolicyWatcher {
    store: DynDocumentStore,
    db: String,
    notifier: Arc<PolicyChangeNotifier>,
    config: SyncConfig,

    changes_observed: AtomicU64,
    stream_errors: AtomicU64,
    reconnects: AtomicU64,
}

impl PolicyWatcher {
    #[must_use]
    pub fn new(
        store: DynDocumentStore,
        db: impl Into<String>,
        notifier: Arc<PolicyChangeNotifier>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            db: db.into(),
            notifier,
            config,
            changes_observed: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Subscribes to the feed, then follows it on a background task until
    /// `cancel` fires.
    ///
    /// Any change committed after this returns is observed.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial subscription fails.
    #[instrument(skip_all, name = "policy_watcher", fields(db = %self.db))]
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> AuthResult<JoinHandle<()>> {
        let stream = self
            .subscribe(ChangesSince::Now, &cancel)
            .await?;
        info!("watching policy changes");
        Ok(tokio::spawn(async move { self.run(stream, cancel).await }))
    }

    async fn subscribe(
        &self,
        since: ChangesSince,
        cancel: &CancellationToken,
    ) -> AuthResult<ChangeStream> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            stream = self.store.changes(&self.db, since) => Ok(stream?),
        }
    }

    async fn run(&self, mut stream: ChangeStream, cancel: CancellationToken) {
        let mut last_seq: Option<String> = None;
        let mut backoff = self.config.reconnect_initial_backoff;

        loop {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(db = %self.db, "policy watcher stopped");
                        return;
                    }
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(record)) => {
                        backoff = self.config.reconnect_initial_backoff;
                        last_seq = Some(record.seq.clone());
                        if record.is_design() {
                            continue;
                        }
                        debug!(id = %record.id, deleted = record.deleted, seq = %record.seq, "policy document changed");
                        self.changes_observed.fetch_add(1, Ordering::Relaxed);
                        self.notifier.notify(PolicyChange::Changed {
                            rule_id: record.id,
                            deleted: record.deleted,
                        });
                    }
                    Some(Err(e)) => {
                        warn!(db = %self.db, error = %e, "policy change feed failed");
                        self.stream_errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    None => {
                        warn!(db = %self.db, "policy change feed ended");
                        self.stream_errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }

            match self.reconnect(&mut backoff, last_seq.as_deref(), &cancel).await {
                Some(resumed) => stream = resumed,
                None => {
                    info!(db = %self.db, "policy watcher stopped");
                    return;
                }
            }
        }
    }

    /// Resubscribes until it succeeds. Returns `None` once cancelled.
    async fn reconnect(
        &self,
        backoff: &mut Duration,
        last_seq: Option<&str>,
        cancel: &CancellationToken,
    ) -> Option<ChangeStream> {
        loop {
            debug!(db = %self.db, delay_ms = backoff.as_millis() as u64, "resubscribing to policy change feed");
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(*backoff) => {}
            }
            *backoff = (*backoff * 2).min(self.config.reconnect_max_backoff);

            let since = match last_seq {
                Some(seq) => ChangesSince::Seq(seq.to_string()),
                None => ChangesSince::Now,
            };
            match self.subscribe(since, cancel).await {
                Ok(stream) => {
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(db = %self.db, resumed_from = ?last_seq, "policy change feed resubscribed");
                    if last_seq.is_none() {
                        self.notifier.notify(PolicyChange::BulkReload);
                    }
                    return Some(stream);
                }
                Err(AuthError::Cancelled) => return None,
                Err(e) => warn!(db = %self.db, error = %e, "policy change feed resubscription failed"),
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            changes_observed: self.changes_observed.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for PolicyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyWatcher")
            .field("db", &self.db)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
