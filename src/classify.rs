//! Retry classification of attempt outcomes and server hint parsing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    StatusCode,
};

use crate::{ClientOptions, HttpResponse, TransportError, TransportErrorKind};

/// Delay hint in milliseconds. Wins over `retry-after` when both are valid.
pub const RETRY_AFTER_MS: &str = "retry-after-ms";

/// Explicit server override of the retry decision (`true` / `false`).
pub const SHOULD_RETRY: &str = "x-should-retry";

/// Whether an attempt is worth retrying, and how long the server asked to wait.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryDecision {
    pub retryable: bool,
    pub hint: Option<Duration>,
}

impl RetryDecision {
    /// Do not retry.
    pub fn terminal() -> Self {
        Self::default()
    }

    /// Retry, waiting `hint` if the server gave one.
    pub fn retry(hint: Option<Duration>) -> Self {
        Self {
            retryable: true,
            hint,
        }
    }
}

/// Decides retry-worthiness from transport errors, statuses and headers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryClassifier {
    retryable_statuses: Vec<u16>,
    retry_server_errors: bool,
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::from_options(&ClientOptions::default())
    }
}

impl RetryClassifier {
    /// Retries `retryable_statuses`, plus every 5xx when
    /// `retry_server_errors` is set.
    pub fn new(
        retryable_statuses: impl IntoIterator<Item = u16>,
        retry_server_errors: bool,
    ) -> Self {
        Self {
            retryable_statuses: retryable_statuses.into_iter().collect(),
            retry_server_errors,
        }
    }

    /// Classifier configured by `ClientOptions::retryable_statuses` and
    /// `ClientOptions::retry_server_errors`.
    pub fn from_options(options: &ClientOptions) -> Self {
        Self::new(
            options.retryable_statuses.iter().copied(),
            options.retry_server_errors,
        )
    }

    /// Classifies a complete attempt outcome.
    pub fn classify(&self, outcome: &Result<HttpResponse, TransportError>) -> RetryDecision {
        match outcome {
            Ok(response) => self.classify_response(response.status, &response.headers),
            Err(err) => self.classify_transport(err),
        }
    }

    /// Transport failures are retried unless the request itself was invalid.
    pub fn classify_transport(&self, err: &TransportError) -> RetryDecision {
        match err.kind {
            TransportErrorKind::InvalidRequest => RetryDecision::terminal(),
            _ => RetryDecision::retry(None),
        }
    }

    /// Classifies a status, honoring `x-should-retry` on non-2xx responses.
    ///
    /// A retryable decision carries the parsed server hint, if any.
    pub fn classify_response(&self, status: StatusCode, headers: &HeaderMap) -> RetryDecision {
        if status.is_success() {
            return RetryDecision::terminal();
        }

        let retryable = match should_retry_override(headers) {
            Some(value) => value,
            None => self.is_retryable_status(status),
        };
        if retryable {
            RetryDecision::retry(parse_retry_hint(headers))
        } else {
            RetryDecision::terminal()
        }
    }

    /// Status-only retry rule, ignoring headers.
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        (self.retry_server_errors && status.is_server_error())
            || self.retryable_statuses.contains(&status.as_u16())
    }
}

fn should_retry_override(headers: &HeaderMap) -> Option<bool> {
    let value = headers.get(SHOULD_RETRY)?.to_str().ok()?.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Extracts the server retry hint from response headers.
///
/// Malformed values never fail: they count as "no hint".
pub fn parse_retry_hint(headers: &HeaderMap) -> Option<Duration> {
    parse_retry_hint_at(headers, Utc::now())
}

/// [`parse_retry_hint`] with `now` supplied for HTTP-date values.
pub fn parse_retry_hint_at(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(millis) = header_number(headers, RETRY_AFTER_MS) {
        return Some(nanos_to_duration(millis * 1e6));
    }

    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Some(seconds) = parse_number(value) {
        return Some(nanos_to_duration(seconds * 1e9));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        date.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<f64> {
    parse_number(headers.get(name)?.to_str().ok()?)
}

fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

// Zero and negative values mean "retry now".
fn nanos_to_duration(nanos: f64) -> Duration {
    if nanos <= 0.0 {
        return Duration::ZERO;
    }
    if nanos >= u64::MAX as f64 {
        return Duration::MAX;
    }
    Duration::from_nanos(nanos.round() as u64)
}
