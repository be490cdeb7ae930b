//! Transport-level error type.

use thiserror::Error;

/// Errors returned by a [`crate::QueryTransport`].
///
/// The pipeline treats every variant the same way for retry purposes, but
/// `Timeout` is kept distinct so logs can tell a client-side abort apart
/// from a failure reported by the service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client aborted the request after its timeout elapsed.
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },

    /// The service answered with a non-success HTTP status.
    #[error("service returned status {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },

    /// The service answered but reported structured errors.
    #[error("service error: {}", .messages.join("; "))]
    Service {
        messages: Vec<String>,
    },

    /// The HTTP request itself failed (connect, TLS, body read, ...).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not valid JSON.
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether this error is a client-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
