//! `HttpTransport`: a JSON-over-HTTP query client.
//!
//! Requests are POSTed as `{"operationName": .., "variables": {..}}`.
//! Responses are expected in the usual `{"data": .., "errors": [..]}` shape.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{QueryRequest, QueryTransport, TransportError};

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<ServiceErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    message: String,
}

/// Query transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn execute(&self, request: &QueryRequest) -> Result<Value, TransportError> {
        let body = json!({
            "operationName": request.operation,
            "variables": request.variables,
        });

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        debug!(operation = %request.operation, endpoint = %self.endpoint, "sending query");
        let response = builder.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let envelope: ResponseEnvelope = serde_json::from_str(&text)?;
        if !envelope.errors.is_empty() {
            return Err(TransportError::Service {
                messages: envelope.errors.into_iter().map(|e| e.message).collect(),
            });
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }
}
