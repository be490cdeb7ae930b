//! Execution listing and per-execution context lookup.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use transport::{query_with_timeout, QueryRequest, QueryTransport};

use crate::{models::RawExecution, QueryError};

use super::decode_member;

pub const LIST_EXECUTIONS: &str = "ListExecutions";
pub const EXECUTION_CONTEXT: &str = "ExecutionContext";

/// Variables for one `ListExecutions` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Tenant ids for the service's "in" filter.
    pub organization_ids: Vec<String>,
    pub workflow_id: Option<String>,
    pub limit: u32,
}

impl ExecutionFilter {
    pub fn to_request(&self) -> QueryRequest {
        let mut request = QueryRequest::new(LIST_EXECUTIONS)
            .var("from", self.from.to_rfc3339_opts(SecondsFormat::Millis, true))
            .var("to", self.to.to_rfc3339_opts(SecondsFormat::Millis, true))
            .var("organizationIds", self.organization_ids.clone())
            .var("limit", self.limit);
        if let Some(workflow_id) = &self.workflow_id {
            request = request.var("workflowId", workflow_id.clone());
        }
        request
    }
}

/// Fetch raw executions matching `filter`.
pub async fn list_executions(
    transport: &dyn QueryTransport,
    filter: &ExecutionFilter,
    timeout: Duration,
) -> Result<Vec<RawExecution>, QueryError> {
    let data = query_with_timeout(transport, &filter.to_request(), timeout).await?;
    decode_member(LIST_EXECUTIONS, data, "executions")
}

/// Fetch the full trigger/actor context of one execution.
///
/// The context is returned as loosely-shaped JSON; classification walks it
/// with explicit extraction strategies.
pub async fn get_execution_context(
    transport: &dyn QueryTransport,
    execution_id: &str,
    timeout: Duration,
) -> Result<Value, QueryError> {
    let request = QueryRequest::new(EXECUTION_CONTEXT).var("executionId", execution_id);
    let data = query_with_timeout(transport, &request, timeout).await?;
    let context: Value = decode_member(EXECUTION_CONTEXT, data, "executionContext")?;

    if !context.is_object() {
        return Err(QueryError::MissingField {
            operation: EXECUTION_CONTEXT,
            field: "executionContext",
        });
    }
    Ok(context)
}
