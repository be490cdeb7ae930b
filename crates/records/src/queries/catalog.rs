//! Workflow and form catalogs used to build the reference cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use transport::{query_with_timeout, QueryRequest, QueryTransport};

use crate::QueryError;

use super::decode_member;

pub const LIST_WORKFLOWS: &str = "ListWorkflows";
pub const LIST_FORMS: &str = "ListForms";

/// A trigger attached to a workflow in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogTrigger {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub form_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCatalogEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub triggers: Vec<CatalogTrigger>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub fields: Value,
}

/// Return the full workflow catalog.
pub async fn list_workflows(
    transport: &dyn QueryTransport,
    timeout: Duration,
) -> Result<Vec<WorkflowCatalogEntry>, QueryError> {
    let data = query_with_timeout(transport, &QueryRequest::new(LIST_WORKFLOWS), timeout).await?;
    decode_member(LIST_WORKFLOWS, data, "workflows")
}

/// Return every form schema.
pub async fn list_forms(
    transport: &dyn QueryTransport,
    timeout: Duration,
) -> Result<Vec<FormSchema>, QueryError> {
    let data = query_with_timeout(transport, &QueryRequest::new(LIST_FORMS), timeout).await?;
    decode_member(LIST_FORMS, data, "forms")
}
