use std::{sync::Arc, time::Duration};

use crate::{AttemptRecord, CallContext, Clock, HttpRequest, Transport, TransportError};

/// Sends exactly one physical request through the injected transport.
///
/// The call context is handed to the transport untouched; abandoning a send
/// when it fires is the transport's job.
#[derive(Clone)]
pub struct AttemptExecutor {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
}

impl AttemptExecutor {
    /// Executor without a per-attempt timeout.
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            timeout: None,
        }
    }

    /// Limits each attempt. Expiry is a retryable transport timeout, not a
    /// caller deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Sends `request` once and records its outcome and elapsed time.
    ///
    /// Never fails by itself: every problem ends up in
    /// [`AttemptRecord::outcome`].
    pub async fn execute(
        &self,
        attempt: u32,
        request: HttpRequest,
        ctx: &CallContext,
    ) -> AttemptRecord {
        let started = self.clock.now();
        let send = self.transport.send(request, ctx);

        let outcome = match self.timeout {
            Some(limit) => {
                tokio::select! {
                    biased;
                    outcome = send => outcome,
                    _ = self.clock.sleep(limit) => Err(TransportError::timeout(format!(
                        "attempt {attempt} timed out after {} ms",
                        limit.as_millis()
                    ))),
                }
            }
            None => send.await,
        };

        AttemptRecord {
            attempt,
            outcome,
            elapsed: self.clock.now().saturating_duration_since(started),
        }
    }
}
