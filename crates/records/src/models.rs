//! Execution data model.
//!
//! [`RawExecution`] maps 1-to-1 onto a row of the `ListExecutions` operation.
//! [`ExecutionRecord`] is the same row after the enrichment stage has
//! attached provenance. Enrichment only ever adds fields; nothing a raw row
//! carries is removed or rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Status of an execution as reported by the service.
///
/// The service does not guarantee a fixed vocabulary, so anything unknown is
/// kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
    Running,
    Canceled,
    Other(String),
}

impl From<String> for ExecutionStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "succeeded" | "success" | "completed" => Self::Succeeded,
            "failed" | "failure" | "error" => Self::Failed,
            "running" | "in_progress" | "pending" => Self::Running,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Other(raw),
        }
    }
}

impl From<ExecutionStatus> for String {
    fn from(status: ExecutionStatus) -> Self {
        status.to_string()
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Running => write!(f, "running"),
            Self::Canceled => write!(f, "canceled"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub time_saved_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_org_id: Option<String>,
}

/// Who started an execution, when the service can tell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// The form behind a form-submission trigger.
///
/// `id` is `None` when the context named no form and the catalog could not
/// supply one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub submitted_inputs: Option<Value>,
}

// ---------------------------------------------------------------------------
// Trigger provenance
// ---------------------------------------------------------------------------

/// Why an execution happened. Exactly one variant is attached per enriched
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerInfo {
    Cron {
        trigger_name: Option<String>,
        schedule: Option<String>,
        timezone: Option<String>,
    },
    Webhook {
        trigger_name: Option<String>,
        method: Option<String>,
    },
    AppPlatform {
        actor: Option<String>,
    },
    FormSubmission {
        form: FormRef,
    },
    SubWorkflow {
        parent_execution_id: String,
    },
    ManualOrTest,
    Skipped {
        matched: String,
    },
    Unknown {
        raw_kind: Option<String>,
    },
}

impl TriggerInfo {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Cron { .. } => TriggerKind::Cron,
            Self::Webhook { .. } => TriggerKind::Webhook,
            Self::AppPlatform { .. } => TriggerKind::AppPlatform,
            Self::FormSubmission { .. } => TriggerKind::FormSubmission,
            Self::SubWorkflow { .. } => TriggerKind::SubWorkflow,
            Self::ManualOrTest => TriggerKind::ManualOrTest,
            Self::Skipped { .. } => TriggerKind::Skipped,
            Self::Unknown { .. } => TriggerKind::Unknown,
        }
    }
}

/// Discriminant of [`TriggerInfo`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Cron,
    Webhook,
    AppPlatform,
    FormSubmission,
    SubWorkflow,
    ManualOrTest,
    Skipped,
    Unknown,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Cron => "cron",
            Self::Webhook => "webhook",
            Self::AppPlatform => "app_platform",
            Self::FormSubmission => "form_submission",
            Self::SubWorkflow => "sub_workflow",
            Self::ManualOrTest => "manual_or_test",
            Self::Skipped => "skipped",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "cron"            => Ok(Self::Cron),
            "webhook"         => Ok(Self::Webhook),
            "app_platform"    => Ok(Self::AppPlatform),
            "form_submission" => Ok(Self::FormSubmission),
            "sub_workflow"    => Ok(Self::SubWorkflow),
            "manual_or_test"  => Ok(Self::ManualOrTest),
            "skipped"         => Ok(Self::Skipped),
            "unknown"         => Ok(Self::Unknown),
            other             => Err(format!("unknown trigger kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// RawExecution
// ---------------------------------------------------------------------------

/// One execution row exactly as `ListExecutions` returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExecution {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub tasks_completed: u64,
    pub workflow: WorkflowRef,
    pub organization: OrganizationRef,
    #[serde(default)]
    pub parent_execution_id: Option<String>,
    #[serde(default)]
    pub trigger_id: Option<String>,
    /// The trigger payload the service stored with the execution, if any.
    #[serde(default, alias = "triggerData")]
    pub trigger_payload: Option<Value>,
    #[serde(default)]
    pub user: Option<UserRef>,
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// An execution row plus the provenance attached by the enrichment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub tasks_completed: u64,
    pub workflow: WorkflowRef,
    pub organization: OrganizationRef,
    pub parent_execution_id: Option<String>,
    pub trigger_id: Option<String>,
    pub trigger_payload: Option<Value>,

    // ------ Enrichment payload ------
    pub trigger_info: Option<TriggerInfo>,
    pub user: Option<UserRef>,
    pub tasks_used: u64,
    /// Set when the context lookup failed; reconciliation may still resolve it.
    pub retryable: bool,
}

impl From<RawExecution> for ExecutionRecord {
    fn from(raw: RawExecution) -> Self {
        Self {
            id: raw.id,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            status: raw.status,
            tasks_completed: raw.tasks_completed,
            workflow: raw.workflow,
            organization: raw.organization,
            parent_execution_id: raw.parent_execution_id,
            trigger_id: raw.trigger_id,
            trigger_payload: raw.trigger_payload,
            trigger_info: None,
            user: raw.user,
            tasks_used: raw.tasks_completed,
            retryable: false,
        }
    }
}

impl ExecutionRecord {
    /// Attach the resolved trigger and recompute `tasks_used`.
    ///
    /// Sub-workflow runs are accounted to their parent and skipped runs are
    /// not counted, so both report zero tasks used.
    pub fn apply_trigger(&mut self, info: TriggerInfo) {
        self.tasks_used = match info.kind() {
            TriggerKind::SubWorkflow | TriggerKind::Skipped => 0,
            _ => self.tasks_completed,
        };
        self.trigger_info = Some(info);
        self.retryable = false;
    }

    /// Mark the record as returned without provenance but eligible for retry.
    pub fn mark_unresolved(&mut self) {
        self.trigger_info = None;
        self.retryable = true;
    }

    pub fn is_unresolved(&self) -> bool {
        self.retryable && self.trigger_info.is_none()
    }

    pub fn trigger_kind(&self) -> Option<TriggerKind> {
        self.trigger_info.as_ref().map(TriggerInfo::kind)
    }

    /// The submitted form, when the execution was started by one.
    pub fn form(&self) -> Option<&FormRef> {
        match &self.trigger_info {
            Some(TriggerInfo::FormSubmission { form }) => Some(form),
            _ => None,
        }
    }

    /// Fill in enrichment fields from a newer copy of the same execution.
    ///
    /// Only fields that are still empty are taken from `newer`; anything
    /// already enriched is kept. Returns whether something changed.
    pub fn absorb(&mut self, newer: ExecutionRecord) -> bool {
        let mut changed = false;

        if self.trigger_info.is_none() {
            if let Some(info) = newer.trigger_info {
                self.apply_trigger(info);
                changed = true;
            }
        }
        if self.user.is_none() && newer.user.is_some() {
            self.user = newer.user;
            changed = true;
        }

        changed
    }
}
