//! Cancellation and deadline envelope attached to one logical call.

use std::{fmt, time::Duration};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Reason a [`CallContext`] fired.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Caller-supplied cancellation signal plus an optional absolute deadline.
///
/// The context is assembled before the call starts and passed unchanged into
/// every physical attempt. Cloning is cheap; clones observe the same token.
///
/// ```
/// use std::time::Duration;
/// use dispatch_http::CallContext;
///
/// let ctx = CallContext::new().with_timeout(Duration::from_secs(30));
/// assert!(!ctx.is_done());
/// ```
#[derive(Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("canceled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl CallContext {
    /// A context that never fires on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `token` as the cancellation signal.
    ///
    /// Keep a clone of the token to cancel the call from elsewhere.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Sets an absolute deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: impl Into<Instant>) -> Self {
        let deadline = deadline.into();
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Sets the deadline to `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Token that cancels this call when triggered.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Absolute deadline, if one is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns the reason the context fired, if it has.
    ///
    /// Explicit cancellation wins over an expired deadline.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.token.is_cancelled() {
            return Err(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Returns `true` once the context is canceled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        if let Err(err) = self.check() {
            return err;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ContextError::Canceled,
                    _ = sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}
