//! Authorization core configuration.
//!
//! Database names, bootstrap credentials, password hashing cost and the
//! tuning knobs of the policy watcher and reload service.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration of the authorization core.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// public_host = "https://enseada.example.com"
/// root_password = "change-me"
///
/// [auth.sync]
/// debounce = "100ms"
/// reconnect_max_backoff = "30s"
/// ```
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Names of the logical databases.
    pub databases: DatabaseNames,

    /// Public base URL of the server, used for default client redirect URIs.
    pub public_host: String,

    /// Password of the `root` user created on first start.
    /// When unset no root user is bootstrapped.
    pub root_password: Option<String>,

    /// Secret of the default `enseada` OAuth client.
    /// When unset no default client is bootstrapped.
    pub default_client_secret: Option<String>,

    /// Document store call settings.
    pub store: StoreConfig,

    /// Password hashing cost.
    pub password: PasswordConfig,

    /// Policy watcher and reload service settings.
    pub sync: SyncConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            databases: DatabaseNames::default(),
            public_host: "http://localhost:9623".to_string(),
            root_password: None,
            default_client_secret: None,
            store: StoreConfig::default(),
            password: PasswordConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("databases", &self.databases)
            .field("public_host", &self.public_host)
            .field("root_password", &self.root_password.as_ref().map(|_| "[redacted]"))
            .field(
                "default_client_secret",
                &self.default_client_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("store", &self.store)
            .field("password", &self.password)
            .field("sync", &self.sync)
            .finish()
    }
}

/// Names of the logical databases owned by the authorization core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseNames {
    /// Policy rules.
    pub acl: String,
    /// Clients, requests, OIDC sessions and PKCE requests.
    pub oauth: String,
    /// User credentials.
    pub users: String,
}

impl Default for DatabaseNames {
    fn default() -> Self {
        Self {
            acl: "acl".to_string(),
            oauth: "oauth".to_string(),
            users: "users".to_string(),
        }
    }
}

/// Document store call settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound on a single store call when the caller's context has no
    /// earlier deadline.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        // Argon2 library defaults (OWASP minimum).
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl PasswordConfig {
    /// Cheapest valid parameters, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Settings of the policy watcher and the reload service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of the policy change notification channel.
    pub channel_capacity: usize,

    /// Changes arriving within this window are coalesced into one reload.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// First delay before resubscribing to a lost change feed.
    #[serde(with = "humantime_serde")]
    pub reconnect_initial_backoff: Duration,

    /// Cap of the resubscription delay.
    #[serde(with = "humantime_serde")]
    pub reconnect_max_backoff: Duration,

    /// Attempts per reload before giving up until the next change.
    pub max_reload_attempts: usize,

    /// First delay between reload attempts; doubles on each retry.
    #[serde(with = "humantime_serde")]
    pub reload_retry_backoff: Duration,

    /// Full reload interval independent of the change feed. Unset disables it.
    #[serde(with = "humantime_serde")]
    pub periodic_refresh: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            debounce: Duration::from_millis(100),
            reconnect_initial_backoff: Duration::from_millis(500),
            reconnect_max_backoff: Duration::from_secs(30),
            max_reload_attempts: 3,
            reload_retry_backoff: Duration::from_secs(1),
            periodic_refresh: Some(Duration::from_secs(300)),
        }
    }
}

impl SyncConfig {
    /// Configuration with no periodic refresh.
    #[must_use]
    pub fn without_periodic_refresh() -> Self {
        Self {
            periodic_refresh: None,
            ..Default::default()
        }
    }

    /// Configuration for testing with fast timeouts.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            channel_capacity: 256,
            debounce: Duration::from_millis(20),
            reconnect_initial_backoff: Duration::from_millis(10),
            reconnect_max_backoff: Duration::from_millis(80),
            max_reload_attempts: 3,
            reload_retry_backoff: Duration::from_millis(10),
            periodic_refresh: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, name) in [
            ("databases.acl", &self.databases.acl),
            ("databases.oauth", &self.databases.oauth),
            ("databases.users", &self.databases.users),
        ] {
            if name.is_empty() {
                return Err(ConfigError::Missing(key.to_string()));
            }
        }

        if url::Url::parse(&self.public_host).is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "public_host '{}' is not a valid URL",
                self.public_host
            )));
        }

        if self.root_password.as_deref() == Some("") {
            return Err(ConfigError::InvalidValue(
                "root_password cannot be blank".to_string(),
            ));
        }

        if self.default_client_secret.as_deref() == Some("") {
            return Err(ConfigError::InvalidValue(
                "default_client_secret cannot be blank".to_string(),
            ));
        }

        if self.password.iterations == 0 || self.password.parallelism == 0 {
            return Err(ConfigError::InvalidValue(
                "password iterations and parallelism must be > 0".to_string(),
            ));
        }

        if self.password.memory_kib < 8 * self.password.parallelism {
            return Err(ConfigError::InvalidValue(
                "password memory_kib must be at least 8 * parallelism".to_string(),
            ));
        }

        if self.sync.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.channel_capacity must be > 0".to_string(),
            ));
        }

        if self.sync.max_reload_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.max_reload_attempts must be > 0".to_string(),
            ));
        }

        if self.sync.reconnect_initial_backoff > self.sync.reconnect_max_backoff {
            return Err(ConfigError::InvalidValue(
                "sync.reconnect_initial_backoff cannot exceed sync.reconnect_max_backoff"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
