use std::fmt;

use reqwest::header::HeaderMap;

use crate::context::ContextError;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The call context was canceled by the caller.
    #[error("call canceled")]
    Canceled,
    /// The call context deadline passed.
    #[error("call deadline exceeded")]
    DeadlineExceeded,
    /// Every allowed attempt failed with a retryable outcome.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of physical attempts that were sent.
        attempts: u32,
        /// Failure of the final attempt.
        last: AttemptFailure,
    },
    /// An attempt failed with an outcome that is not worth retrying.
    #[error("request failed: {0}")]
    Failed(AttemptFailure),
    /// Successful response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Request descriptor could not be turned into a physical request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// Returns `true` for caller cancellation and deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// HTTP status of the failing attempt, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RetriesExhausted { last, .. } | Self::Failed(last) => last.status(),
            _ => None,
        }
    }
}

impl From<ContextError> for DispatchError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Canceled => Self::Canceled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Outcome of a failed physical attempt.
#[derive(Debug, thiserror::Error)]
pub enum AttemptFailure {
    /// No status was obtained.
    #[error("{0}")]
    Transport(TransportError),
    /// A well-formed response with a non-success status.
    #[error("{0}")]
    Status(StatusError),
}

impl AttemptFailure {
    /// HTTP status, when the attempt got as far as a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(_) => None,
            Self::Status(err) => Some(err.status),
        }
    }
}

/// Non-success HTTP status with its headers and raw body.
#[derive(Debug, Clone, thiserror::Error)]
#[error("http error {status}: {body}")]
pub struct StatusError {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Broad category of a transport failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportErrorKind {
    /// Connection could not be established.
    Connect,
    /// The attempt ran out of time (not the caller's deadline).
    Timeout,
    /// Response body could not be read.
    Body,
    /// The request could not be built or sent at all.
    InvalidRequest,
    /// The transport abandoned the send because the call context fired.
    Canceled,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Body => "body",
            Self::InvalidRequest => "invalid request",
            Self::Canceled => "canceled",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Physical send failed before a status was obtained.
#[derive(Clone, Debug, thiserror::Error)]
#[error("transport error ({kind}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    /// Creates an error of the given kind.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Per-attempt timeout expiry. Retryable.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    /// The send was abandoned because the call context fired.
    pub fn canceled() -> Self {
        Self::new(TransportErrorKind::Canceled, "call context fired")
    }

    /// Returns `true` if the attempt ran out of time.
    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // is_connect() is checked first: reqwest reports some connect failures
        // as request errors too.
        let kind = if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_builder() {
            TransportErrorKind::InvalidRequest
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}
