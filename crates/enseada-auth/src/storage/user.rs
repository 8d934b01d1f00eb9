//! User storage and authentication traits.

use async_trait::async_trait;

use crate::types::User;
use crate::{AuthResult, Context};

/// Storage operations for local users.
///
/// Plaintext passwords are hashed before any write and cleared from the
/// [`User`] afterwards.
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Creates a user, hashing `user.password` unless a hash is already set.
    ///
    /// # Errors
    ///
    /// Returns `Validation` ("user password cannot be blank") when there is
    /// nothing to hash, leaving `user` untouched; `Conflict` if the username
    /// is taken.
    async fn save_user(&self, ctx: &Context, user: &mut User) -> AuthResult<()>;

    /// Returns `None` if the user does not exist.
    async fn get_user(&self, ctx: &Context, username: &str) -> AuthResult<Option<User>>;

    /// Writes the user, hashing a non-empty `user.password` and fetching the
    /// current revision if `user.rev` is unset.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if `user.rev` is stale.
    async fn update_user(&self, ctx: &Context, user: &mut User) -> AuthResult<()>;

    async fn delete_user(&self, ctx: &Context, user: &mut User) -> AuthResult<()>;

    async fn list_users(&self, ctx: &Context) -> AuthResult<Vec<User>>;
}

/// Username and password authentication.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verifies the credentials and returns the user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for an unknown user and for a wrong
    /// password alike.
    async fn authenticate(&self, ctx: &Context, username: &str, password: &str)
    -> AuthResult<User>;
}
