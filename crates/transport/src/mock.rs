//! `MockTransport`: a test double for `QueryTransport`.
//!
//! The reply for each request is produced by a closure, so tests can script
//! behaviour per operation, per variable, or per call number.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{QueryRequest, QueryTransport, TransportError};

/// What the mock does for one request.
pub enum MockReply {
    /// Return the value immediately.
    Value(Value),
    /// Fail with a structured service error.
    ServiceError(String),
    /// Wait, then return the value. Pair with a short timeout to simulate a
    /// hung request.
    Delayed(Duration, Value),
}

impl MockReply {
    pub fn value(value: Value) -> Self {
        Self::Value(value)
    }

    pub fn service_error(msg: impl Into<String>) -> Self {
        Self::ServiceError(msg.into())
    }

    pub fn delayed(delay: Duration, value: Value) -> Self {
        Self::Delayed(delay, value)
    }

    /// A request that never answers in any realistic test timeout.
    pub fn hang() -> Self {
        Self::Delayed(Duration::from_secs(24 * 60 * 60), Value::Null)
    }
}

type Responder = dyn Fn(&QueryRequest) -> MockReply + Send + Sync;

/// A mock transport that records every request it receives.
#[derive(Clone)]
pub struct MockTransport {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<QueryRequest>>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&QueryRequest) -> MockReply + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<QueryRequest>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.recorded().len()
    }

    /// All requests received so far, in call order.
    pub fn calls(&self) -> Vec<QueryRequest> {
        self.recorded().clone()
    }

    /// Requests for one operation, in call order.
    pub fn calls_for(&self, operation: &str) -> Vec<QueryRequest> {
        self.recorded()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueryTransport for MockTransport {
    async fn execute(&self, request: &QueryRequest) -> Result<Value, TransportError> {
        self.recorded().push(request.clone());

        match (self.responder)(request) {
            MockReply::Value(v) => Ok(v),
            MockReply::ServiceError(msg) => Err(TransportError::Service { messages: vec![msg] }),
            MockReply::Delayed(delay, v) => {
                tokio::time::sleep(delay).await;
                Ok(v)
            }
        }
    }
}
