//! In-memory reference cache: trigger id → workflow, form id → schema.
//!
//! Built lazily from the full workflow and form catalogs the first time
//! enrichment needs it, and dropped only by an explicit [`ReferenceCache::clear`].
//! A rebuild replaces both maps at once, so a trigger entry is either absent
//! or fully populated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use records::queries::catalog::{self, FormSchema, WorkflowCatalogEntry};
use records::{FormRef, QueryError};
use serde_json::Value;
use tracing::{info, warn};
use transport::QueryTransport;

/// What the cache knows about one trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEntry {
    pub workflow_id: String,
    pub workflow_name: String,
    pub trigger_name: Option<String>,
    pub form_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct ReferenceCache {
    triggers: HashMap<String, TriggerEntry>,
    forms: HashMap<String, FormSchema>,
    built: bool,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index already-fetched catalogs.
    pub fn from_catalogs(workflows: Vec<WorkflowCatalogEntry>, forms: Vec<FormSchema>) -> Self {
        let mut triggers = HashMap::new();
        for workflow in workflows {
            for trigger in workflow.triggers {
                triggers.insert(
                    trigger.id,
                    TriggerEntry {
                        workflow_id: workflow.id.clone(),
                        workflow_name: workflow.name.clone(),
                        trigger_name: trigger.name,
                        form_id: trigger.form_id,
                    },
                );
            }
        }
        let forms = forms.into_iter().map(|f| (f.id.clone(), f)).collect();

        Self { triggers, forms, built: true }
    }

    /// Fetch both catalogs and index them.
    pub async fn load(
        transport: &dyn QueryTransport,
        timeout: Duration,
    ) -> Result<Self, QueryError> {
        let (workflows, forms) = tokio::try_join!(
            catalog::list_workflows(transport, timeout),
            catalog::list_forms(transport, timeout),
        )?;
        Ok(Self::from_catalogs(workflows, forms))
    }

    /// Build the cache if it has not been built this session.
    ///
    /// A failed build leaves the cache empty and unbuilt so the next call
    /// tries again; enrichment proceeds without names in the meantime.
    pub async fn ensure_built(
        &mut self,
        transport: &Arc<dyn QueryTransport>,
        timeout: Duration,
    ) -> bool {
        if self.built {
            return true;
        }
        match Self::load(transport.as_ref(), timeout).await {
            Ok(loaded) => {
                info!(
                    triggers = loaded.triggers.len(),
                    forms = loaded.forms.len(),
                    "reference cache built"
                );
                *self = loaded;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to build reference cache; continuing without it");
                false
            }
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn trigger(&self, trigger_id: &str) -> Option<&TriggerEntry> {
        self.triggers.get(trigger_id)
    }

    pub fn form(&self, form_id: &str) -> Option<&FormSchema> {
        self.forms.get(form_id)
    }

    /// Describe a submitted form, naming it from the catalog when possible.
    pub fn form_ref(&self, form_id: Option<String>, submitted_inputs: Option<Value>) -> FormRef {
        let schema = form_id.as_deref().and_then(|id| self.form(id));
        FormRef {
            id: form_id,
            name: schema.map(|s| s.name.clone()),
            link: schema.and_then(|s| s.link.clone()),
            submitted_inputs,
        }
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
        self.forms.clear();
        self.built = false;
    }
}
