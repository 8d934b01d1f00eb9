//! Argon2id hashing for user passwords and client secrets.
//!
//! - Hashes are PHC strings (`$argon2id$v=19$m=..,t=..,p=..$salt$hash`), so
//!   the cost parameters travel with each hash
//! - Every call draws a fresh salt from `OsRng`; equal inputs never produce
//!   equal hashes
//! - Verification is constant-time in the compared digest

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use rand::Rng;

use crate::config::PasswordConfig;
use crate::{AuthError, AuthResult};

/// Hashes and verifies secrets with configured Argon2id cost.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    /// Verified in place of a real hash when the account does not exist.
    dummy_hash: String,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher")
            .field("params", self.argon2.params())
            .finish_non_exhaustive()
    }
}

impl SecretHasher {
    /// Creates a hasher with the given cost.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the parameters are out of Argon2's range.
    pub fn new(config: &PasswordConfig) -> AuthResult<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| AuthError::configuration(format!("invalid argon2 parameters: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let filler: [u8; 16] = rand::thread_rng().r#gen();
        let dummy_hash = hash_with(&argon2, &hex::encode(filler))?;

        Ok(Self { argon2, dummy_hash })
    }

    /// Hashes a non-empty secret.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty secret.
    pub fn hash(&self, secret: &str) -> AuthResult<String> {
        if secret.is_empty() {
            return Err(AuthError::validation("secret cannot be blank"));
        }
        hash_with(&self.argon2, secret)
    }

    /// Returns `true` if `secret` matches the PHC `hash`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the stored hash is malformed.
    pub fn verify(&self, secret: &str, hash: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AuthError::internal(format!("malformed password hash: {e}")))?;
        match self.argon2.verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::internal(format!("password verification failed: {e}"))),
        }
    }

    /// Spends the same work as a real verification and always fails.
    pub fn verify_dummy(&self, secret: &str) {
        let _ = self.verify(secret, &self.dummy_hash);
    }

    /// [`hash`](Self::hash) on the blocking thread pool.
    pub async fn hash_async(&self, secret: &str) -> AuthResult<String> {
        let hasher = self.clone();
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AuthError::internal(format!("hashing task failed: {e}")))?
    }

    /// [`verify`](Self::verify) on the blocking thread pool. A `None` hash
    /// verifies against the dummy hash and yields `false`.
    pub async fn verify_async(&self, secret: &str, hash: Option<&str>) -> AuthResult<bool> {
        let hasher = self.clone();
        let secret = secret.to_string();
        let hash = hash.map(str::to_string);
        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&secret, &hash),
            None => {
                hasher.verify_dummy(&secret);
                Ok(false)
            }
        })
        .await
        .map_err(|e| AuthError::internal(format!("verification task failed: {e}")))?
    }
}

fn hash_with(argon2: &Argon2<'_>, secret: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::internal(format!("password hashing failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> SecretHasher {
        SecretHasher::new(&PasswordConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_hash_is_salted_phc() {
        let hasher = hasher();
        let a = hasher.hash("hunter2").unwrap();
        let b = hasher.hash("hunter2").unwrap();
        assert!(a.starts_with("$argon2id$"));
        assert_ne!(a, b);
        assert!(a.contains("m=64,t=1,p=1"));
    }

    #[test]
    fn test_verify() {
        let hasher = hasher();
        let hash = hasher.hash("hunter2").unwrap();
        assert!(hasher.verify("hunter2", &hash).unwrap());
        assert!(!hasher.verify("hunter2x", &hash).unwrap());
    }

    #[test]
    fn test_verify_with_other_cost() {
        let other = PasswordConfig {
            memory_kib: 256,
            iterations: 2,
            parallelism: 2,
        };
        let stored = SecretHasher::new(&other)
            .unwrap()
            .hash("pw")
            .unwrap();
        // Parameters are read from the stored hash.
        assert!(hasher().verify("pw", &stored).unwrap());
    }

    #[test]
    fn test_blank_secret_rejected() {
        let err = hasher().hash("").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_malformed_hash() {
        assert!(hasher().verify("pw", "not-a-hash").is_err());
    }

    #[test]
    fn test_invalid_params() {
        let config = PasswordConfig {
            memory_kib: 1,
            iterations: 1,
            parallelism: 1,
        };
        assert!(SecretHasher::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_async_variants() {
        let hasher = hasher();
        let hash = hasher.hash_async("pw").await.unwrap();
        assert!(hasher.verify_async("pw", Some(&hash)).await.unwrap());
        assert!(!hasher.verify_async("pw", None).await.unwrap());
        assert!(hasher.hash_async("").await.unwrap_err().is_validation());
    }
}
