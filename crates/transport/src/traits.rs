//! The `QueryTransport` trait: the contract every query backend must fulfil.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::TransportError;

/// One request against the remote query service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    /// Name of the remote operation, e.g. `ListExecutions`.
    pub operation: String,
    /// Named variables for the operation.
    pub variables: Map<String, Value>,
}

impl QueryRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            variables: Map::new(),
        }
    }

    /// Builder-style variable setter.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Read back a variable (mostly useful in tests and mocks).
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// A remote service that accepts `(operation, variables)` and returns a
/// result payload.
///
/// Implementations must not apply their own retry policy; the pipeline
/// decides what to retry and with which timeout.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Execute the request and return the operation's result payload.
    async fn execute(&self, request: &QueryRequest) -> Result<Value, TransportError>;
}

/// Run `request` with a client-enforced timeout.
///
/// When the timeout elapses the in-flight future is dropped, which aborts
/// the underlying request, and [`TransportError::Timeout`] is returned.
pub async fn query_with_timeout(
    transport: &dyn QueryTransport,
    request: &QueryRequest,
    timeout: Duration,
) -> Result<Value, TransportError> {
    match tokio::time::timeout(timeout, transport.execute(request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            operation: request.operation.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockTransport};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn slow_reply_is_reported_as_timeout() {
        let transport = MockTransport::new(|_| {
            MockReply::delayed(Duration::from_secs(30), json!({ "ok": true }))
        });
        let request = QueryRequest::new("ListExecutions");

        let err = query_with_timeout(&transport, &request, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(matches!(err, TransportError::Timeout { timeout_ms: 5000, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_reply_passes_through() {
        let transport = MockTransport::new(|_| {
            MockReply::delayed(Duration::from_millis(200), json!({ "rows": [] }))
        });
        let request = QueryRequest::new("ListExecutions").var("limit", 10);

        let value = query_with_timeout(&transport, &request, Duration::from_secs(5))
            .await
            .expect("should not time out");

        assert_eq!(value, json!({ "rows": [] }));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.calls()[0].variable("limit"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn service_errors_are_not_timeouts() {
        let transport = MockTransport::new(|_| MockReply::service_error("boom"));
        let request = QueryRequest::new("ListForms");

        let err = query_with_timeout(&transport, &request, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(!err.is_timeout());
    }
}
