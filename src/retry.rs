//! Attempt loop for one logical call.

use std::{sync::Arc, time::Duration};

use crate::{
    clock::wait, AttemptExecutor, AttemptFailure, BackoffPolicy, CallContext, ClientOptions,
    Clock, DispatchError, HttpRequest, HttpResponse, Result, RetryClassifier, StatusError,
    TokioClock, Transport,
};

/// Drives sequential physical attempts until success, a terminal failure,
/// an exhausted budget, or caller cancellation.
#[derive(Clone)]
pub struct RetryLoop {
    executor: AttemptExecutor,
    clock: Arc<dyn Clock>,
    classifier: RetryClassifier,
    backoff: BackoffPolicy,
    max_attempts: u32,
    max_elapsed: Option<Duration>,
}

impl RetryLoop {
    /// Builds a loop over `transport` with budget, backoff and classification
    /// taken from `options`, using the tokio clock.
    pub fn new(transport: Arc<dyn Transport>, options: &ClientOptions) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let executor = AttemptExecutor::new(transport, clock.clone())
            .with_timeout(options.attempt_timeout_ms.map(Duration::from_millis));
        Self {
            executor,
            clock,
            classifier: RetryClassifier::from_options(options),
            backoff: BackoffPolicy::from_options(options),
            max_attempts: options.max_attempts(),
            max_elapsed: options.max_elapsed_ms.map(Duration::from_millis),
        }
    }

    /// Replaces the clock for both backoff waits and attempt timeouts.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.executor.set_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Replaces the retry classifier.
    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replaces the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Clock currently in use.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Runs the call. `build` produces the physical request for each 1-based
    /// attempt and is invoked once per attempt.
    ///
    /// A fired context is reported as [`DispatchError::Canceled`] or
    /// [`DispatchError::DeadlineExceeded`] even when the in-flight attempt
    /// produced a response.
    pub async fn run<F>(&self, ctx: &CallContext, mut build: F) -> Result<HttpResponse>
    where
        F: FnMut(u32) -> Result<HttpRequest>,
    {
        let started = self.clock.now();
        let mut attempt = 1u32;

        loop {
            ctx.check()?;
            let request = build(attempt)?;

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt,
                method = %request.method,
                url = %request.url,
                "sending attempt"
            );

            let record = self.executor.execute(attempt, request, ctx).await;
            ctx.check()?;

            let decision = self.classifier.classify(&record.outcome);
            let failure = match record.outcome {
                Ok(response) if response.is_success() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, status = %response.status, "attempt succeeded");
                    return Ok(response);
                }
                Ok(response) => AttemptFailure::Status(StatusError {
                    status: response.status.as_u16(),
                    body: response.text(),
                    headers: response.headers,
                }),
                Err(err) => AttemptFailure::Transport(err),
            };

            if !decision.retryable {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt,
                    error = %failure,
                    "attempt failed with non-retryable outcome"
                );
                return Err(DispatchError::Failed(failure));
            }
            if attempt >= self.max_attempts {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempts = attempt, error = %failure, "retries exhausted");
                return Err(DispatchError::RetriesExhausted {
                    attempts: attempt,
                    last: failure,
                });
            }

            let delay = self.backoff.delay(attempt, decision.hint);
            if let Some(limit) = self.max_elapsed {
                let elapsed = self.clock.now().saturating_duration_since(started);
                if elapsed.saturating_add(delay) > limit {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempts = attempt, ?elapsed, "retry time budget exhausted");
                    return Err(DispatchError::RetriesExhausted {
                        attempts: attempt,
                        last: failure,
                    });
                }
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt,
                elapsed_ms = record.elapsed.as_millis() as u64,
                delay_ms = delay.as_millis() as u64,
                hint_ms = decision.hint.map(|hint| hint.as_millis() as u64),
                error = %failure,
                "retrying after delay"
            );

            wait(self.clock.as_ref(), delay, ctx).await?;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use reqwest::{header::HeaderMap, Method, StatusCode};
    use tokio::time::Instant;

    use super::RetryLoop;
    use crate::{
        transport_fn, BackoffPolicy, CallContext, ClientOptions, Clock, DispatchError,
        HttpRequest, HttpResponse, RetryClassifier, TransportError,
    };

    /// Records requested delays and returns at once.
    #[derive(Default)]
    struct RecordingClock {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        fn now(&self) -> Instant {
            Instant::now()
        }

        async fn sleep(&self, delay: Duration) {
            self.delays
                .lock()
                .expect("delay log mutex must not be poisoned")
                .push(delay);
        }
    }

    fn build(attempt: u32) -> crate::Result<HttpRequest> {
        let mut headers = HeaderMap::new();
        headers.insert("x-retry-count", (attempt - 1).into());
        Ok(HttpRequest {
            method: Method::POST,
            url: "http://localhost/v1/messages".to_owned(),
            headers,
            body: Some(b"{}".to_vec()),
        })
    }

    fn scripted(statuses: Vec<(StatusCode, Option<&'static str>)>) -> (Arc<AtomicU32>, RetryLoop) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let statuses = Arc::new(statuses);
        let transport = transport_fn(move |_request, _ctx| {
            let index = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let (status, retry_after) = statuses
                .get(index)
                .copied()
                .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, None));
            async move {
                let response = HttpResponse::new(status);
                match retry_after {
                    Some(value) => response.with_header("Retry-After", value),
                    None => Ok(response),
                }
            }
        });
        (hits, RetryLoop::new(Arc::new(transport), &ClientOptions::default()))
    }

    #[tokio::test]
    async fn returns_first_success_without_retrying() {
        let (hits, retry) = scripted(vec![(StatusCode::OK, None)]);
        let clock = Arc::new(RecordingClock::default());
        let retry = retry.with_clock(clock.clone());

        let response = retry
            .run(&CallContext::new(), build)
            .await
            .expect("call must succeed");

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(clock.delays.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn retries_until_success() {
        let (hits, retry) = scripted(vec![
            (StatusCode::SERVICE_UNAVAILABLE, Some("0")),
            (StatusCode::TOO_MANY_REQUESTS, Some("0")),
            (StatusCode::CREATED, None),
        ]);
        let clock = Arc::new(RecordingClock::default());
        let retry = retry.with_clock(clock.clone());

        let response = retry
            .run(&CallContext::new(), build)
            .await
            .expect("third attempt must succeed");

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(
            *clock.delays.lock().expect("lock"),
            vec![Duration::ZERO, Duration::ZERO]
        );
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let (hits, retry) = scripted(vec![(StatusCode::BAD_GATEWAY, Some("0")); 10]);
        let clock = Arc::new(RecordingClock::default());
        let retry = retry.with_clock(clock.clone());

        let err = retry
            .run(&CallContext::new(), build)
            .await
            .expect_err("all attempts fail");

        match err {
            DispatchError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.status(), Some(502));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(clock.delays.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_status_is_terminal_immediately() {
        let (hits, retry) = scripted(vec![(StatusCode::UNPROCESSABLE_ENTITY, Some("0"))]);
        let retry = retry.with_clock(Arc::new(RecordingClock::default()));

        let err = retry
            .run(&CallContext::new(), build)
            .await
            .expect_err("422 must not retry");

        assert!(matches!(err, DispatchError::Failed(_)));
        assert_eq!(err.status(), Some(422));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn computed_backoff_used_without_hint() {
        let (_, retry) = scripted(vec![(StatusCode::INTERNAL_SERVER_ERROR, None); 3]);
        let clock = Arc::new(RecordingClock::default());
        let retry = retry.with_clock(clock.clone());

        let _ = retry.run(&CallContext::new(), build).await;

        let delays = clock.delays.lock().expect("lock").clone();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] <= Duration::from_millis(500) && delays[0] >= Duration::from_millis(375));
        assert!(delays[1] <= Duration::from_secs(1) && delays[1] >= Duration::from_millis(750));
    }

    #[tokio::test]
    async fn elapsed_budget_stops_retries() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let transport = transport_fn(move |_request, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE).with_header("retry-after", "5")
            }
        });
        let options = ClientOptions {
            max_retries: 5,
            max_elapsed_ms: Some(1_000),
            ..ClientOptions::default()
        };
        let retry = RetryLoop::new(Arc::new(transport), &options)
            .with_clock(Arc::new(RecordingClock::default()));

        let err = retry
            .run(&CallContext::new(), build)
            .await
            .expect_err("budget must stop retries");

        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let transport = transport_fn(move |_request, _ctx| {
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if seen == 0 {
                    Err(TransportError::timeout("connection stalled"))
                } else {
                    Ok(HttpResponse::new(StatusCode::OK))
                }
            }
        });
        let retry = RetryLoop::new(Arc::new(transport), &ClientOptions::default())
            .with_clock(Arc::new(RecordingClock::default()));

        retry
            .run(&CallContext::new(), build)
            .await
            .expect("second attempt must succeed");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn custom_classifier_and_backoff_are_used() {
        let (hits, retry) = scripted(vec![(StatusCode::NOT_FOUND, None); 3]);
        let clock = Arc::new(RecordingClock::default());
        let retry = retry
            .with_classifier(RetryClassifier::new([404], false))
            .with_backoff(BackoffPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                jitter_ratio: 0.0,
                max_retry_after: Duration::from_secs(1),
            })
            .with_clock(clock.clone());

        let err = retry
            .run(&CallContext::new(), build)
            .await
            .expect_err("404 keeps failing");

        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(
            *clock.delays.lock().expect("lock"),
            vec![Duration::from_millis(10); 2]
        );
    }

    #[tokio::test]
    async fn canceled_context_sends_nothing() {
        let (hits, retry) = scripted(vec![(StatusCode::OK, None)]);
        let ctx = CallContext::new();
        ctx.cancellation_token().cancel();

        let err = retry.run(&ctx, build).await.expect_err("must be canceled");

        assert!(matches!(err, DispatchError::Canceled));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn build_errors_are_not_retried() {
        let (hits, retry) = scripted(vec![]);
        let err = retry
            .run(&CallContext::new(), |_| {
                Err(DispatchError::InvalidRequest("bad url".to_owned()))
            })
            .await
            .expect_err("build error must surface");

        assert!(matches!(err, DispatchError::InvalidRequest(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
