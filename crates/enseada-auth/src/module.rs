//! Wiring of the authorization core.
//!
//! [`AuthModule`] owns one replica's view: the persistence adapters, the
//! enforcer, and the watcher and reload tasks that keep the enforcer in step
//! with other replicas. It is constructed once at startup and shared by
//! reference; nothing here is process-global.

use std::sync::Arc;

use enseada_storage::DynDocumentStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AuthConfig;
use crate::document::{AuthStore, DocumentGateway};
use crate::password::SecretHasher;
use crate::policy::{
    DocumentPolicyAdapter, Enforcer, PolicyChangeNotifier, PolicyReloadService, PolicyWatcher,
};
use crate::{AuthError, AuthResult, Context, migrate};

/// Dependencies of [`AuthModule`].
#[derive(Clone)]
pub struct AuthDeps {
    pub store: DynDocumentStore,
    pub config: AuthConfig,
}

pub struct AuthModule {
    config: AuthConfig,
    store: AuthStore,
    enforcer: Arc<Enforcer>,
    notifier: Arc<PolicyChangeNotifier>,
    watcher: Arc<PolicyWatcher>,
    reload: Arc<PolicyReloadService>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AuthModule {
    /// Validates the configuration, runs migrations and loads the policy.
    ///
    /// No background task runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for invalid settings, or the store error that
    /// stopped migrations or the initial policy load.
    #[tracing::instrument(skip_all, name = "auth_module_init")]
    pub async fn new(ctx: &Context, deps: AuthDeps) -> AuthResult<Self> {
        let AuthDeps { store, config } = deps;
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        migrate::run(ctx, &store, &config.databases).await?;

        let request_timeout = config.store.request_timeout;
        let hasher = SecretHasher::new(&config.password)?;
        let auth_store = AuthStore::new(store.clone(), &config.databases, request_timeout, hasher);

        let notifier = Arc::new(PolicyChangeNotifier::new(config.sync.channel_capacity));
        let adapter = Arc::new(DocumentPolicyAdapter::new(DocumentGateway::new(
            store.clone(),
            &config.databases.acl,
            request_timeout,
        )));
        let enforcer = Arc::new(Enforcer::new(adapter).with_notifier(notifier.clone()));
        enforcer.load_policy(ctx).await?;

        let cancel = CancellationToken::new();
        let watcher = Arc::new(PolicyWatcher::new(
            store,
            &config.databases.acl,
            notifier.clone(),
            config.sync.clone(),
        ));
        let reload = Arc::new(PolicyReloadService::new(
            enforcer.clone(),
            notifier.clone(),
            config.sync.clone(),
            cancel.child_token(),
        ));

        tracing::info!(
            rules = enforcer.snapshot().len(),
            acl = %config.databases.acl,
            "authorization core initialized"
        );

        Ok(Self {
            config,
            store: auth_store,
            enforcer,
            notifier,
            watcher,
            reload,
            cancel,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Bootstraps the default client and root user, then starts the reload
    /// service and the policy watcher and reloads the policy once the change
    /// feed is subscribed. Calling it again only re-runs the bootstrap.
    pub async fn start(&self, ctx: &Context) -> AuthResult<()> {
        if let Some(secret) = &self.config.default_client_secret {
            self.store
                .init_default_clients(ctx, &self.config.public_host, secret)
                .await?;
        }
        if let Some(password) = &self.config.root_password {
            self.store.ensure_root_user(ctx, password).await?;
        }

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Ok(());
        }
        tasks.push(self.reload.clone().start());
        tasks.push(
            self.watcher
                .clone()
                .start(self.cancel.child_token())
                .await?,
        );
        // writes between the load in `new` and the feed subscription are not on the feed
        self.enforcer.load_policy(ctx).await?;
        tracing::info!(
            rules = self.enforcer.snapshot().len(),
            "policy synchronization started"
        );
        Ok(())
    }

    /// Cancels the background tasks and waits for them to finish.
    ///
    /// An in-flight reload is abandoned at its next store call.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "policy synchronization task ended abnormally");
            }
        }
        tracing::info!("authorization core stopped");
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Persistence adapters.
    #[must_use]
    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    #[must_use]
    pub fn enforcer(&self) -> &Arc<Enforcer> {
        &self.enforcer
    }

    #[must_use]
    pub fn notifier(&self) -> &Arc<PolicyChangeNotifier> {
        &self.notifier
    }

    #[must_use]
    pub fn watcher(&self) -> &Arc<PolicyWatcher> {
        &self.watcher
    }

    #[must_use]
    pub fn reload_service(&self) -> &Arc<PolicyReloadService> {
        &self.reload
    }
}

impl std::fmt::Debug for AuthModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthModule")
            .field("config", &self.config)
            .field("enforcer", &self.enforcer)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}
