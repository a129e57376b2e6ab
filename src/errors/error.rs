//! Error types for mediated outbound calls.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for individual call attempts.
pub type CallResult<T> = Result<T, CallError>;

/// Result type alias for the orchestrator's public entry point.
pub type OperationResult<T> = Result<T, OperationError>;

/// Classification of a failed call.
///
/// The retryable flag is fixed by kind: `Network`, `Timeout`, `RateLimit`, and
/// `Server` failures are transient and may be retried; the rest surface
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection-level failure (DNS, connect, reset) or a fast-failed circuit
    Network,
    /// An attempt exceeded its deadline
    Timeout,
    /// Admission denied by a rate limit (local or downstream)
    RateLimit,
    /// Credentials rejected by the downstream service
    Auth,
    /// Request rejected as malformed before or by the downstream service
    Validation,
    /// Request refused by the downstream content policy
    ContentPolicy,
    /// Downstream 5xx-class failure
    Server,
    /// Queued work cancelled by the caller before dispatch
    Canceled,
}

impl ErrorKind {
    /// Whether failures of this kind are safe to retry with backoff.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Server
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::ContentPolicy => "content_policy",
            ErrorKind::Server => "server",
            ErrorKind::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Error raised by a single mediated call attempt.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// Network error (connection failed, reset, DNS issues)
    #[error("Network error: {message}")]
    Network {
        /// Description of the network failure
        message: String,
    },

    /// An attempt ran past its deadline
    #[error("Operation timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// Rate limit exceeded (local admission control or downstream 429)
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Description of the rate limit condition
        message: String,
        /// Duration to wait before retrying, when known
        retry_after: Option<Duration>,
    },

    /// Authentication failure
    #[error("Authentication error: {message}")]
    Auth {
        /// Description of the authentication failure
        message: String,
    },

    /// Invalid request parameters
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the validation failure
        message: String,
    },

    /// Request refused by the downstream content policy
    #[error("Content policy violation: {message}")]
    ContentPolicy {
        /// Description of the policy refusal
        message: String,
    },

    /// Server error (5xx responses from the downstream service)
    #[error("Server error: {message}")]
    Server {
        /// Error message from the server
        message: String,
        /// HTTP status code, when the transport exposes one
        status_code: Option<u16>,
    },

    /// Call refused without a network attempt because the service's circuit is
    /// open. Reported under the `network` kind but never retried; the circuit
    /// will admit a trial call after `retry_in`.
    #[error("Circuit open for service `{service}`, next trial in {retry_in:?}")]
    CircuitOpen {
        /// Downstream service identity whose circuit is open
        service: String,
        /// Time until the breaker admits a trial call
        retry_in: Option<Duration>,
    },

    /// Queued work cancelled by the caller before it was dispatched
    #[error("Operation `{operation}` cancelled while queued")]
    Canceled {
        /// Operation key of the cancelled work
        operation: String,
    },
}

impl CallError {
    /// The taxonomy kind of this error.
    ///
    /// A fast-failed circuit reports `network`: callers observe the same kind a
    /// real connection failure would have produced, just without the wait.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Network { .. } | CallError::CircuitOpen { .. } => ErrorKind::Network,
            CallError::Timeout { .. } => ErrorKind::Timeout,
            CallError::RateLimit { .. } => ErrorKind::RateLimit,
            CallError::Auth { .. } => ErrorKind::Auth,
            CallError::Validation { .. } => ErrorKind::Validation,
            CallError::ContentPolicy { .. } => ErrorKind::ContentPolicy,
            CallError::Server { .. } => ErrorKind::Server,
            CallError::Canceled { .. } => ErrorKind::Canceled,
        }
    }

    /// Returns true if this error may be retried with exponential backoff.
    ///
    /// `CircuitOpen` is excluded even though it reports the `network` kind:
    /// retrying inside the cooldown would only burn attempts against a closed
    /// gate.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::CircuitOpen { .. } => false,
            other => other.kind().is_retryable(),
        }
    }

    /// The retry-after hint, when one is available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CallError::RateLimit { retry_after, .. } => *retry_after,
            CallError::CircuitOpen { retry_in, .. } => *retry_in,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::Validation {
            message: format!("JSON serialization/deserialization error: {}", err),
        }
    }
}

/// Terminal error returned by the orchestrator's `execute`.
///
/// Carries the failing operation key alongside the underlying call error so
/// callers can branch on `kind()`/`is_retryable()` rather than raw messages.
/// `retryable` is `false` when retries were exhausted or the failure was a
/// fast-fail, regardless of the underlying kind.
#[derive(Error, Debug, Clone)]
#[error("Operation `{operation}` failed: {source}")]
pub struct OperationError {
    /// Key of the failing operation
    pub operation: String,
    /// Whether a fresh `execute` call is worth attempting
    pub retryable: bool,
    /// The underlying call error
    #[source]
    pub source: CallError,
}

impl OperationError {
    /// Build a terminal error for `operation`, deriving `retryable` from the
    /// underlying error's kind.
    pub fn new(operation: impl Into<String>, source: CallError) -> Self {
        Self {
            operation: operation.into(),
            retryable: source.is_retryable(),
            source,
        }
    }

    /// Build a terminal error that must not be blindly re-executed (retries
    /// exhausted, fast-failed circuit).
    pub fn terminal(operation: impl Into<String>, source: CallError) -> Self {
        Self {
            operation: operation.into(),
            retryable: false,
            source,
        }
    }

    /// The taxonomy kind of the underlying error.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// The retry-after hint of the underlying error, when available.
    pub fn retry_after(&self) -> Option<Duration> {
        self.source.retry_after()
    }
}
