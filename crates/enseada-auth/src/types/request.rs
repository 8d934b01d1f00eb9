//! OAuth 2.0 requests in flight and the session data attached to them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Kind of token session a request is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    AuthorizeCode,
    AccessToken,
    RefreshToken,
}

impl TokenType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizeCode => "authorize_code",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }

    /// Label used in not-found errors.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::AuthorizeCode => "authorize code",
            Self::AccessToken => "access token",
            Self::RefreshToken => "refresh token",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session payload carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub subject: String,
    pub username: String,

    /// Unix timestamps (seconds) at which each token kind expires.
    pub expires_at: BTreeMap<TokenType, i64>,

    /// OIDC nonce from the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Requested ID token claims.
    pub claims: BTreeMap<String, Value>,

    pub extra: BTreeMap<String, Value>,
}

impl Session {
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        Self {
            username: subject.clone(),
            subject,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_expiry(mut self, kind: TokenType, at: OffsetDateTime) -> Self {
        self.expires_at.insert(kind, at.unix_timestamp());
        self
    }

    #[must_use]
    pub fn expires_at(&self, kind: TokenType) -> Option<OffsetDateTime> {
        self.expires_at
            .get(&kind)
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(*ts).ok())
    }
}

/// One authorization, access or refresh grant in flight.
///
/// The request id groups every token issued from one grant and is what token
/// revocation targets. Sessions are looked up by signature, not by this id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthRequest {
    pub id: String,

    /// Issue time, UTC, whole seconds.
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,

    pub client_id: String,

    #[serde(default)]
    pub requested_scopes: Vec<String>,

    #[serde(default)]
    pub granted_scopes: Vec<String>,

    #[serde(default)]
    pub requested_audience: Vec<String>,

    #[serde(default)]
    pub granted_audience: Vec<String>,

    /// Raw form parameters of the originating HTTP request.
    #[serde(default)]
    pub form: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub session: Session,
}

impl OAuthRequest {
    /// Creates a request with a fresh id, issued now.
    #[must_use]
    pub fn new(client_id: impl Into<String>, session: Session) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            requested_at: now.replace_nanosecond(0).unwrap_or(now),
            client_id: client_id.into(),
            requested_scopes: Vec::new(),
            granted_scopes: Vec::new(),
            requested_audience: Vec::new(),
            granted_audience: Vec::new(),
            form: BTreeMap::new(),
            session,
        }
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn grant_scope(&mut self, scope: impl Into<String>) {
        let scope = scope.into();
        if !self.granted_scopes.contains(&scope) {
            self.granted_scopes.push(scope);
        }
    }

    pub fn grant_audience(&mut self, audience: impl Into<String>) {
        let audience = audience.into();
        if !self.granted_audience.contains(&audience) {
            self.granted_audience.push(audience);
        }
    }

    /// First value of a form parameter.
    #[must_use]
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Sets `requested_at`, normalised to UTC whole seconds.
    #[must_use]
    pub fn requested_at(mut self, at: OffsetDateTime) -> Self {
        let at = at.to_offset(time::UtcOffset::UTC);
        self.requested_at = at.replace_nanosecond(0).unwrap_or(at);
        self
    }
}
