//! OAuth 2.0 client registrations.

use serde::{Deserialize, Serialize};

use crate::password::SecretHasher;
use crate::{AuthError, AuthResult};

/// A registered OAuth 2.0 client.
///
/// Confidential clients carry an Argon2 hash of their secret. Public clients
/// (browser and native apps using PKCE) carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    /// Client identifier, also the document id.
    pub id: String,

    /// Revision last observed for this client.
    #[serde(skip)]
    pub rev: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashed_secret: Option<String>,

    #[serde(default)]
    pub redirect_uris: Vec<String>,

    #[serde(default)]
    pub grant_types: Vec<String>,

    #[serde(default)]
    pub response_types: Vec<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub audiences: Vec<String>,

    #[serde(default)]
    pub public: bool,
}

impl OAuthClient {
    /// Starts building a client with the given id.
    pub fn builder(id: impl Into<String>) -> OAuthClientBuilder {
        OAuthClientBuilder::new(id)
    }

    /// Checks a presented client secret against the stored hash.
    ///
    /// Public clients never authenticate with a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored hash is malformed.
    pub fn verify_secret(&self, hasher: &SecretHasher, secret: &str) -> AuthResult<bool> {
        match &self.hashed_secret {
            Some(hash) if !self.public => hasher.verify(secret, hash),
            _ => Ok(false),
        }
    }

    /// Whether the client may use the given redirect URI.
    #[must_use]
    pub fn allows_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    #[must_use]
    pub fn has_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }
}

/// Builder for [`OAuthClient`].
#[derive(Debug, Clone)]
pub struct OAuthClientBuilder {
    id: String,
    secret: Option<String>,
    redirect_uris: Vec<String>,
    grant_types: Vec<String>,
    response_types: Vec<String>,
    scopes: Vec<String>,
    audiences: Vec<String>,
    public: bool,
}

impl OAuthClientBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: None,
            redirect_uris: Vec::new(),
            grant_types: vec!["authorization_code".to_string()],
            response_types: vec!["code".to_string()],
            scopes: Vec::new(),
            audiences: Vec::new(),
            public: false,
        }
    }

    /// Plaintext secret; hashed by [`build`](Self::build).
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    #[must_use]
    pub fn redirect_uris<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redirect_uris = uris.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn grant_types<I, S>(mut self, grant_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grant_types = grant_types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn response_types<I, S>(mut self, response_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response_types = response_types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Validates the registration and hashes the secret.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty id or a confidential client without a
    /// secret.
    pub fn build(self, hasher: &SecretHasher) -> AuthResult<OAuthClient> {
        if self.id.trim().is_empty() {
            return Err(AuthError::validation("client ID cannot be empty"));
        }

        let hashed_secret = if self.public {
            None
        } else {
            match self.secret.as_deref() {
                Some(secret) if !secret.is_empty() => Some(hasher.hash(secret)?),
                _ => {
                    return Err(AuthError::validation(
                        "client secret cannot be empty for non-public clients",
                    ));
                }
            }
        };

        Ok(OAuthClient {
            id: self.id,
            rev: None,
            hashed_secret,
            redirect_uris: self.redirect_uris,
            grant_types: self.grant_types,
            response_types: self.response_types,
            scopes: self.scopes,
            audiences: self.audiences,
            public: self.public,
        })
    }
}
