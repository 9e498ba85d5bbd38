//! `dispatch-http` is the request-dispatch core of an async HTTP API client.
//!
//! One logical call is sent as one or more sequential physical attempts:
//! - [`RetryLoop`] drives attempts, backoff waits and cancellation
//! - [`RetryClassifier`] decides retry-worthiness and reads server hints
//! - [`BackoffPolicy`] computes capped exponential delays with jitter
//! - [`ApiClient`] binds a base URL, default headers and a [`Transport`]

mod attempt;
mod backoff;
mod classify;
mod client;
mod clock;
mod context;
mod error;
mod options;
mod retry;
mod transport;
mod types;

pub use attempt::AttemptExecutor;
pub use backoff::BackoffPolicy;
pub use classify::{
    parse_retry_hint, parse_retry_hint_at, RetryClassifier, RetryDecision, RETRY_AFTER_MS,
    SHOULD_RETRY,
};
pub use client::{ApiClient, RETRY_COUNT_HEADER, USER_AGENT};
pub use clock::{wait, Clock, TokioClock};
pub use context::{CallContext, ContextError};
pub use error::{AttemptFailure, DispatchError, StatusError, TransportError, TransportErrorKind};
pub use options::ClientOptions;
pub use retry::RetryLoop;
pub use transport::{transport_fn, FnTransport, ReqwestTransport, Transport};
pub use types::{ApiRequest, AttemptRecord, HttpRequest, HttpResponse};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, DispatchError>;
