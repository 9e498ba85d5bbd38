//! Timer abstraction used between attempts.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::context::{CallContext, ContextError};

/// Source of time and delays for the retry loop.
///
/// Dropping the future returned by [`Clock::sleep`] must cancel the
/// underlying timer.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, delay: Duration);
}

/// [`Clock`] backed by `tokio::time`. Honors paused test time.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Waits for `delay` unless `ctx` fires first.
///
/// The losing branch is dropped, so a pending timer never outlives the wait.
/// A context that has already fired wins even when `delay` is zero.
pub async fn wait(
    clock: &dyn Clock,
    delay: Duration,
    ctx: &CallContext,
) -> Result<(), ContextError> {
    ctx.check()?;
    tokio::select! {
        biased;
        reason = ctx.done() => Err(reason),
        _ = clock.sleep(delay) => Ok(()),
    }
}
