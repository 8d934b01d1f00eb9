use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use enseada_auth::AuthConfig;
use enseada_couchdb::CouchConfig;
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides, e.g. `ENSEADA__AUTH__PUBLIC_HOST`.
pub const ENV_PREFIX: &str = "ENSEADA";

/// Top-level configuration of the server process.
///
/// ```toml
/// [couchdb]
/// url = "http://localhost:5984/"
/// username = "admin"
///
/// [auth]
/// public_host = "https://enseada.example.com"
///
/// [logging]
/// level = "info"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub couchdb: CouchConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config file {0} does not exist")]
    MissingFile(String),

    #[error("failed to read configuration: {0}")]
    Build(#[from] config::ConfigError),

    #[error("invalid auth configuration: {0}")]
    Invalid(#[from] enseada_auth::ConfigError),
}

impl ServerConfig {
    /// Renders the configuration as TOML, with secrets included.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Loads the configuration from `path` (when given) with environment overrides on top.
///
/// An explicitly named file must exist; without a path only defaults and the
/// environment apply.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigLoadError> {
    load_config_with_env(
        path,
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    )
}

fn load_config_with_env(
    path: Option<&Path>,
    env: Environment,
) -> Result<ServerConfig, ConfigLoadError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigLoadError::MissingFile(path.display().to_string()));
        }
        builder = builder.add_source(File::from(path).format(FileFormat::Toml));
    }
    let merged: ServerConfig = builder.add_source(env).build()?.try_deserialize()?;
    merged.auth.validate()?;
    Ok(merged)
}
