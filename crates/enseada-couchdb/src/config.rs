use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for a CouchDB server.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouchConfig {
    /// Base URL of the server, e.g. `http://localhost:5984/`.
    pub url: String,
    pub username: String,
    pub password: Option<String>,
    /// Timeout for ordinary requests.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long CouchDB holds a long-poll `_changes` request open.
    #[serde(with = "humantime_serde")]
    pub changes_timeout: Duration,
}

impl Default for CouchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5984/".to_string(),
            username: "admin".to_string(),
            password: None,
            request_timeout: Duration::from_secs(10),
            changes_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for CouchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CouchConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("request_timeout", &self.request_timeout)
            .field("changes_timeout", &self.changes_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let config = CouchConfig {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn test_deserialize_durations() {
        let config: CouchConfig = serde_json::from_value(serde_json::json!({
            "url": "http://couch:5984/",
            "changes_timeout": "5s",
        }))
        .unwrap();
        assert_eq!(config.changes_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.username, "admin");
    }
}
