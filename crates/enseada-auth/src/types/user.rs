//! Local users.

use std::fmt;

/// Username of the bootstrap administrator.
pub const ROOT_USERNAME: &str = "root";

/// A local user.
///
/// `password` holds a plaintext password only between construction and the
/// save or update that hashes it; the storage adapter clears it after hashing
/// and never persists it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct User {
    pub username: String,

    /// Revision last observed for this user.
    pub rev: Option<String>,

    pub hashed_password: Option<String>,

    pub password: Option<String>,
}

impl User {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// The bootstrap administrator.
    #[must_use]
    pub fn root(password: impl Into<String>) -> Self {
        Self::new(ROOT_USERNAME, password)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.username == ROOT_USERNAME
    }

    /// Replaces the plaintext password; hashed on the next update.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("rev", &self.rev)
            .field("hashed_password", &self.hashed_password.as_ref().map(|_| "<hash>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
