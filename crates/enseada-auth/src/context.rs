//! Request-scoped cancellation and deadlines.
//!
//! Every persistence call takes a [`Context`]. A cancelled context or a passed
//! deadline aborts the in-flight document store call with
//! [`AuthError::Cancelled`] or [`AuthError::DeadlineExceeded`], never with a
//! not-found or conflict error.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{AuthError, AuthResult};

/// Cancellation signal plus optional deadline for one unit of work.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Wraps an existing cancellation token.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derives a context whose cancellation also fires when this one is cancelled,
    /// but which can be cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Same cancellation, with a deadline at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Same cancellation, with the earlier of the current and the given deadline.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails fast if the context is already done.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded`.
    pub fn check(&self) -> AuthResult<()> {
        if self.token.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(AuthError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `fut` until it completes, the context is cancelled, or the deadline passes.
    ///
    /// The future is dropped on cancellation, which aborts any in-flight I/O.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, `Cancelled` or `DeadlineExceeded`.
    pub async fn run<F, T>(&self, fut: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(AuthError::Cancelled),
            _ = sleep_until(self.deadline) => Err(AuthError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
