//! Debounced policy reloading.
//!
//! - [`PolicyChange`] - events that can trigger a reload
//! - [`PolicyChangeNotifier`] - broadcast channel carrying them
//! - [`PolicyReloadService`] - background task that reloads the
//!   [`Enforcer`] from storage with debouncing and retry
//!
//! Remote changes arrive from the [`PolicyWatcher`](super::PolicyWatcher) as
//! [`PolicyChange::Changed`]. Bursts within the debounce window collapse into
//! one reload. Local writes announce themselves as [`PolicyChange::Saved`];
//! the local table is already current, so they are counted but do not reload.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::Enforcer;
use crate::config::SyncConfig;
use crate::{AuthError, Context};

// =============================================================================
// Policy Change Types
// =============================================================================

/// Policy change events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyChange {
    /// A rule document changed in the shared store.
    Changed {
        /// Document id of the rule.
        rule_id: String,
        /// Whether the document was deleted.
        deleted: bool,
    },
    /// This process persisted a policy change.
    Saved,
    /// Reload everything, e.g. after changes may have been missed.
    BulkReload,
}

impl PolicyChange {
    #[must_use]
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::Changed { rule_id, .. } => Some(rule_id),
            Self::Saved | Self::BulkReload => None,
        }
    }

    /// Whether this change requires re-reading the stored policy.
    #[must_use]
    pub fn requires_reload(&self) -> bool {
        !matches!(self, Self::Saved)
    }
}

// =============================================================================
// Policy Change Notifier
// =============================================================================

/// Broadcast channel for policy change notifications.
pub struct PolicyChangeNotifier {
    sender: broadcast::Sender<PolicyChange>,
}

impl PolicyChangeNotifier {
    /// `capacity` bounds the notifications a slow subscriber may lag behind.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Dropped silently if nobody is subscribed.
    pub fn notify(&self, change: PolicyChange) {
        let _ = self.sender.send(change);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyChange> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PolicyChangeNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for PolicyChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// =============================================================================
// Reload Statistics
// =============================================================================

/// Statistics about the reload service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadStats {
    /// Total number of reload attempts.
    pub reload_attempts: u64,
    /// Number of successful reloads.
    pub successful_reloads: u64,
    /// Number of reloads that failed after all retries.
    pub failed_reloads: u64,
    /// Number of notifications received.
    pub notifications_received: u64,
    /// Number of notifications folded into an already pending reload.
    pub notifications_debounced: u64,
    /// Number of local saves observed.
    pub local_updates: u64,
}

// =============================================================================
// Policy Reload Service
// =============================================================================

/// Reloads the enforcer when the stored policy changes.
///
/// The service:
/// - Listens for policy change notifications
/// - Debounces rapid changes to avoid excessive reloads
/// - Periodically refreshes the policy (optional)
/// - Retries failed reloads with exponential backoff
pub struct PolicyReloadService {
    enforcer: Arc<Enforcer>,
    notifier: Arc<PolicyChangeNotifier>,
    config: SyncConfig,
    cancel: CancellationToken,

    reload_attempts: AtomicU64,
    successful_reloads: AtomicU64,
    failed_reloads: AtomicU64,
    notifications_received: AtomicU64,
    notifications_debounced: AtomicU64,
    local_updates: AtomicU64,
}

impl PolicyReloadService {
    #[must_use]
    pub fn new(
        enforcer: Arc<Enforcer>,
        notifier: Arc<PolicyChangeNotifier>,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            enforcer,
            notifier,
            config,
            cancel,
            reload_attempts: AtomicU64::new(0),
            successful_reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
            notifications_received: AtomicU64::new(0),
            notifications_debounced: AtomicU64::new(0),
            local_updates: AtomicU64::new(0),
        }
    }

    /// Subscribes to the notifier and spawns the service loop.
    ///
    /// Notifications sent after this returns are never missed.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let receiver = self.notifier.subscribe();
        tokio::spawn(async move { self.run(receiver).await })
    }

    /// Runs until [`shutdown`](Self::shutdown) or until the notifier is dropped.
    pub async fn run(&self, mut receiver: broadcast::Receiver<PolicyChange>) {
        let debounce = self.config.debounce;
        let periodic = self.config.periodic_refresh;

        let mut pending_reload = false;
        let mut last_notification = Instant::now();
        let mut last_refresh = Instant::now();

        tracing::info!("policy reload service started");
        loop {
            let deadline = match (pending_reload, periodic) {
                (true, Some(every)) => (last_notification + debounce).min(last_refresh + every),
                (true, None) => last_notification + debounce,
                (false, Some(every)) => last_refresh + every,
                (false, None) => Instant::now() + Duration::from_secs(3600),
            };

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!("policy reload service shutting down");
                    break;
                }

                result = receiver.recv() => match result {
                    Ok(change) => {
                        tracing::debug!(change = ?change, "policy change received");
                        self.notifications_received.fetch_add(1, Ordering::Relaxed);
                        if !change.requires_reload() {
                            self.local_updates.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        if pending_reload {
                            self.notifications_debounced.fetch_add(1, Ordering::Relaxed);
                        }
                        pending_reload = true;
                        last_notification = Instant::now();
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "missed policy change notifications");
                        self.notifications_debounced.fetch_add(missed, Ordering::Relaxed);
                        pending_reload = true;
                        last_notification = Instant::now();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("policy change channel closed");
                        break;
                    }
                },

                _ = tokio::time::sleep_until(deadline) => {
                    if pending_reload && last_notification.elapsed() >= debounce {
                        pending_reload = false;
                        self.perform_reload().await;
                        last_refresh = Instant::now();
                    } else if periodic.is_some_and(|every| last_refresh.elapsed() >= every) {
                        tracing::debug!("periodic policy refresh");
                        self.perform_reload().await;
                        last_refresh = Instant::now();
                    }
                }
            }
        }
    }

    async fn perform_reload(&self) {
        match self.reload_with_retry().await {
            Ok(()) | Err(AuthError::Cancelled) => {}
            Err(e) => tracing::error!(error = %e, "policy reload failed after all retries"),
        }
    }

    /// Reloads the enforcer, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once `max_reload_attempts` is exhausted, or
    /// `Cancelled` if the service shuts down meanwhile.
    pub async fn reload_with_retry(&self) -> Result<(), AuthError> {
        let ctx = Context::from_token(self.cancel.child_token());
        let mut attempts = 0;
        let mut backoff = self.config.reload_retry_backoff;

        loop {
            self.reload_attempts.fetch_add(1, Ordering::Relaxed);

            match self.enforcer.load_policy(&ctx).await {
                Ok(()) => {
                    self.successful_reloads.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("policy reloaded");
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.config.max_reload_attempts {
                        self.failed_reloads.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }

                    tracing::warn!(
                        attempt = attempts,
                        max_attempts = self.config.max_reload_attempts,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "policy reload failed, retrying"
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff *= 2;
                }
            }
        }
    }

    /// Requests a full reload through the notification channel.
    pub fn trigger_reload(&self) {
        self.notifier.notify(PolicyChange::BulkReload);
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn stats(&self) -> ReloadStats {
        ReloadStats {
            reload_attempts: self.reload_attempts.load(Ordering::Relaxed),
            successful_reloads: self.successful_reloads.load(Ordering::Relaxed),
            failed_reloads: self.failed_reloads.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            notifications_debounced: self.notifications_debounced.load(Ordering::Relaxed),
            local_updates: self.local_updates.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn enforcer(&self) -> &Arc<Enforcer> {
        &self.enforcer
    }

    #[must_use]
    pub fn notifier(&self) -> &Arc<PolicyChangeNotifier> {
        &self.notifier
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use async_trait::async_trait;

    use super::*;
    use crate::AuthResult;
    use crate::policy::{PolicyAdapter, PolicyRule, RuleTable, SaveSummary};

    // -------------------------------------------------------------------------
    // Mock Adapter
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct MockAdapter {
        rules: parking_lot::Mutex<RuleTable>,
        loads: AtomicUsize,
        fail_count: AtomicUsize,
        always_fail: AtomicBool,
    }

    impl MockAdapter {
        fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PolicyAdapter for MockAdapter {
        async fn load_policy(&self, _ctx: &Context) -> AuthResult<RuleTable> {
            let count = self.loads.fetch_add(1, Ordering::SeqCst);
            if self.always_fail.load(Ordering::SeqCst)
                || count < self.fail_count.load(Ordering::SeqCst)
            {
                return Err(AuthError::storage("simulated storage failure"));
            }
            Ok(self.rules.lock().clone())
        }

        async fn save_policy(&self, _ctx: &Context, table: &RuleTable) -> AuthResult<SaveSummary> {
            *self.rules.lock() = table.clone();
            Ok(SaveSummary::default())
        }

        async fn add_policy(&self, _ctx: &Context, rule: &PolicyRule) -> AuthResult<()> {
            self.rules.lock().insert(rule.clone());
            Ok(())
        }

        async fn remove_policy(&self, _ctx: &Context, rule: &PolicyRule) -> AuthResult<()> {
            self.rules.lock().remove(rule);
            Ok(())
        }
    }

    fn service(config: SyncConfig) -> (Arc<MockAdapter>, Arc<PolicyReloadService>) {
        let adapter = Arc::new(MockAdapter::default());
        let notifier = Arc::new(PolicyChangeNotifier::new(64));
        let enforcer = Arc::new(Enforcer::new(adapter.clone()).with_notifier(notifier.clone()));
        let service = Arc::new(PolicyReloadService::new(
            enforcer,
            notifier,
            config,
            CancellationToken::new(),
        ));
        (adapter, service)
    }

    fn changed(id: &str) -> PolicyChange {
        PolicyChange::Changed {
            rule_id: id.to_string(),
            deleted: false,
        }
    }

    // -------------------------------------------------------------------------
    // PolicyChange / Notifier Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_policy_change_accessors() {
        assert_eq!(changed("rule-1").rule_id(), Some("rule-1"));
        assert_eq!(PolicyChange::BulkReload.rule_id(), None);
        assert!(PolicyChange::BulkReload.requires_reload());
        assert!(!PolicyChange::Saved.requires_reload());
    }

    #[tokio::test]
    async fn test_notifier_multiple_subscribers() {
        let notifier = PolicyChangeNotifier::new(16);
        let mut receiver1 = notifier.subscribe();
        let mut receiver2 = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.notify(changed("rule-1"));
        assert_eq!(receiver1.recv().await.unwrap(), receiver2.recv().await.unwrap());
    }

    #[test]
    fn test_notifier_without_subscribers() {
        let notifier = PolicyChangeNotifier::default();
        notifier.notify(PolicyChange::Saved);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    // -------------------------------------------------------------------------
    // Reload Service Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_reload_with_retry_success() {
        let (adapter, service) = service(SyncConfig::for_testing());
        adapter.rules.lock().insert(PolicyRule::permission("bob", "x", "read"));

        service.reload_with_retry().await.unwrap();

        assert!(service.enforcer().enforce("bob", "x", "read"));
        let stats = service.stats();
        assert_eq!(stats.reload_attempts, 1);
        assert_eq!(stats.successful_reloads, 1);
    }

    #[tokio::test]
    async fn test_reload_with_retry_recovers() {
        let (adapter, service) = service(SyncConfig::for_testing());
        adapter.fail_count.store(2, Ordering::SeqCst);

        service.reload_with_retry().await.unwrap();

        let stats = service.stats();
        assert_eq!(stats.reload_attempts, 3);
        assert_eq!(stats.successful_reloads, 1);
        assert_eq!(stats.failed_reloads, 0);
    }

    #[tokio::test]
    async fn test_reload_with_retry_gives_up() {
        let (adapter, service) = service(SyncConfig::for_testing());
        adapter.always_fail.store(true, Ordering::SeqCst);

        assert!(service.reload_with_retry().await.is_err());

        let stats = service.stats();
        assert_eq!(stats.reload_attempts, 3);
        assert_eq!(stats.failed_reloads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_debounced_into_one_reload() {
        let (adapter, service) = service(SyncConfig::for_testing());
        let handle = service.clone().start();

        for i in 0..10 {
            service.notifier().notify(changed(&format!("rule-{i}")));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(adapter.load_count(), 1);
        let stats = service.stats();
        assert_eq!(stats.notifications_received, 10);
        assert_eq!(stats.notifications_debounced, 9);
        assert_eq!(stats.successful_reloads, 1);

        service.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_saves_do_not_reload() {
        let (adapter, service) = service(SyncConfig::for_testing());
        let handle = service.clone().start();

        let ctx = Context::background();
        service
            .enforcer()
            .add_permission_for_user(&ctx, "bob", "x", "read")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(adapter.load_count(), 0);
        assert_eq!(service.stats().local_updates, 1);

        service.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_reload_and_periodic_refresh() {
        let config = SyncConfig {
            periodic_refresh: Some(Duration::from_secs(60)),
            ..SyncConfig::for_testing()
        };
        let (adapter, service) = service(config);
        let handle = service.clone().start();

        service.trigger_reload();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(adapter.load_count(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(adapter.load_count(), 2);

        service.shutdown();
        handle.await.unwrap();
        assert!(service.is_shutting_down());
    }
}
