//! Trigger classification.
//!
//! Phase 1 ([`infer_trigger`]) looks only at data already fetched with the
//! execution and never touches the network. Its rules are disjoint and
//! applied in order:
//! 1. payload has `cron`, `timezone`, `triggered_at` → Cron
//! 2. payload has `method`, `headers`, `body` → Webhook
//! 3. payload is `{}` or has a key with a reserved prefix → AppPlatform
//! 4. the execution has a parent → SubWorkflow
//! 5. the workflow name matches the skip list → Skipped
//!
//! Anything else needs Phase 2 ([`classify_context`]), which reads the
//! execution context fetched from the service.

use records::{ExecutionRecord, TriggerInfo, UserRef};
use serde_json::{Map, Value};

use crate::cache::ReferenceCache;
use crate::config::EnrichmentConfig;
use crate::extract::{self, first_success};

const CRON_KEYS: [&str; 3] = ["cron", "timezone", "triggered_at"];
const WEBHOOK_KEYS: [&str; 3] = ["method", "headers", "body"];

/// Actor types that mean "the host platform ran this on its own".
const HOST_AUTOMATION_ACTORS: &[&str] = &["host_automation", "app_platform", "system"];
const FORM_TRIGGER_TYPES: &[&str] = &["form_submission", "form"];
const CRON_TRIGGER_TYPES: &[&str] = &["cron", "schedule", "scheduled"];
const WEBHOOK_TRIGGER_TYPES: &[&str] = &["webhook", "http"];

fn has_all(payload: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().all(|k| payload.contains_key(*k))
}

fn str_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn is_one_of(value: &str, set: &[&str]) -> bool {
    set.iter().any(|candidate| value.eq_ignore_ascii_case(candidate))
}

// ---------------------------------------------------------------------------
// Phase 1
// ---------------------------------------------------------------------------

/// Classify from the record alone. `None` means Phase 2 is needed.
///
/// Pure: the same record and rules always give the same answer.
pub fn infer_trigger(record: &ExecutionRecord, rules: &EnrichmentConfig) -> Option<TriggerInfo> {
    let payload_value = record.trigger_payload.as_ref();
    if let Some(payload) = payload_value.and_then(Value::as_object) {
        let trigger_name =
            payload_value.and_then(|v| first_success(extract::PAYLOAD_TRIGGER_NAME, v));

        if has_all(payload, &CRON_KEYS) {
            return Some(TriggerInfo::Cron {
                trigger_name,
                schedule: str_field(payload, "cron"),
                timezone: str_field(payload, "timezone"),
            });
        }
        if has_all(payload, &WEBHOOK_KEYS) {
            return Some(TriggerInfo::Webhook {
                trigger_name,
                method: str_field(payload, "method"),
            });
        }
        let reserved = payload.keys().any(|key| {
            rules
                .reserved_key_prefixes
                .iter()
                .any(|prefix| key.starts_with(prefix.as_str()))
        });
        if payload.is_empty() || reserved {
            return Some(TriggerInfo::AppPlatform { actor: None });
        }
    }

    if let Some(parent) = &record.parent_execution_id {
        return Some(TriggerInfo::SubWorkflow {
            parent_execution_id: parent.clone(),
        });
    }

    rules
        .skip_workflow_patterns
        .iter()
        .find(|pattern| !pattern.is_empty() && record.workflow.name.contains(pattern.as_str()))
        .map(|pattern| TriggerInfo::Skipped {
            matched: pattern.clone(),
        })
}

/// Whether a Phase 1 result still wants a name from the reference cache.
pub fn wants_trigger_name(record: &ExecutionRecord, info: &TriggerInfo) -> bool {
    record.trigger_id.is_some()
        && matches!(
            info,
            TriggerInfo::Cron { trigger_name: None, .. }
                | TriggerInfo::Webhook { trigger_name: None, .. }
        )
}

/// Fill a missing Cron/Webhook trigger name from the cache.
pub fn name_from_cache(
    record: &ExecutionRecord,
    info: TriggerInfo,
    cache: &ReferenceCache,
) -> TriggerInfo {
    let cached = record
        .trigger_id
        .as_deref()
        .and_then(|id| cache.trigger(id))
        .and_then(|entry| entry.trigger_name.clone());

    match info {
        TriggerInfo::Cron { trigger_name: None, schedule, timezone } => TriggerInfo::Cron {
            trigger_name: cached,
            schedule,
            timezone,
        },
        TriggerInfo::Webhook { trigger_name: None, method } => TriggerInfo::Webhook {
            trigger_name: cached,
            method,
        },
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Phase 2
// ---------------------------------------------------------------------------

/// Classify from a fetched execution context.
///
/// Returns the trigger and, when the actor is a person, who it was.
pub fn classify_context(
    record: &ExecutionRecord,
    context: &Value,
    cache: &ReferenceCache,
) -> (TriggerInfo, Option<UserRef>) {
    let user = context_user(context);

    let trigger_id =
        first_success(extract::TRIGGER_ID, context).or_else(|| record.trigger_id.clone());
    let trigger_type = first_success(extract::TRIGGER_TYPE, context);
    let cached = trigger_id.as_deref().and_then(|id| cache.trigger(id));

    // Either signal is enough; the cache only names the form.
    let explicit_form = first_success(extract::FORM_ID, context);
    let typed_as_form = trigger_type
        .as_deref()
        .is_some_and(|t| is_one_of(t, FORM_TRIGGER_TYPES));

    if explicit_form.is_some() || typed_as_form {
        let form_id = explicit_form.or_else(|| cached.and_then(|entry| entry.form_id.clone()));
        let inputs = first_success(extract::SUBMITTED_INPUTS, context);
        return (
            TriggerInfo::FormSubmission {
                form: cache.form_ref(form_id, inputs),
            },
            user,
        );
    }

    if trigger_id.is_none() && trigger_type.is_none() {
        let actor_type = first_success(extract::ACTOR_TYPE, context);
        if actor_type.as_deref().is_some_and(|t| is_one_of(t, HOST_AUTOMATION_ACTORS)) {
            let actor = first_success(extract::ACTOR_LABEL, context);
            return (TriggerInfo::AppPlatform { actor }, None);
        }
        return (TriggerInfo::ManualOrTest, user);
    }

    let trigger_name = cached.and_then(|entry| entry.trigger_name.clone());
    let info = match trigger_type.as_deref() {
        Some(t) if is_one_of(t, CRON_TRIGGER_TYPES) => TriggerInfo::Cron {
            trigger_name,
            schedule: None,
            timezone: None,
        },
        Some(t) if is_one_of(t, WEBHOOK_TRIGGER_TYPES) => TriggerInfo::Webhook {
            trigger_name,
            method: None,
        },
        _ => TriggerInfo::Unknown { raw_kind: trigger_type },
    };
    (info, user)
}

fn context_user(context: &Value) -> Option<UserRef> {
    let actor = context.get("actor")?;
    let is_user = actor
        .get("type")
        .and_then(Value::as_str)
        .map_or(true, |t| t.eq_ignore_ascii_case("user"));
    if !is_user {
        return None;
    }
    let field = |name: &str| actor.get(name).and_then(Value::as_str).map(str::to_owned);
    let user = UserRef {
        id: field("id"),
        name: field("name"),
        email: field("email"),
    };
    (user != UserRef::default()).then_some(user)
}
