//! Typed error type for the records crate.

use thiserror::Error;
use transport::TransportError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("operation '{operation}' returned no '{field}' member")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    #[error("operation '{operation}' returned undecodable rows: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl QueryError {
    /// Whether the underlying failure was a client-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}
