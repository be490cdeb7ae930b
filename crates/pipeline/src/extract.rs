//! Ordered extraction strategies over loosely-shaped JSON.
//!
//! The service stores the same fact in different places depending on how
//! an execution was started. Each list below is tried front to back and the
//! first strategy that yields a value wins. The order is part of the
//! contract and is covered by tests.

use serde_json::Value;

/// One way of finding a value in a payload.
pub type Extractor<T> = fn(&Value) -> Option<T>;

/// Try `strategies` in order; first hit wins.
pub fn first_success<T>(strategies: &[Extractor<T>], value: &Value) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(value))
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn object_at(value: &Value, pointer: &str) -> Option<Value> {
    value.pointer(pointer).filter(|v| v.is_object()).cloned()
}

// ---------------------------------------------------------------------------
// Execution context (Phase 2)
// ---------------------------------------------------------------------------

fn instance_form_id(v: &Value) -> Option<String> {
    string_at(v, "/triggerInstance/formId")
}

fn trigger_execution_form_id(v: &Value) -> Option<String> {
    string_at(v, "/triggerExecution/formId")
}

fn trigger_execution_payload_form_id(v: &Value) -> Option<String> {
    string_at(v, "/triggerExecution/payload/formId")
}

/// Explicit form id carried by the context.
pub const FORM_ID: &[Extractor<String>] = &[
    instance_form_id,
    trigger_execution_form_id,
    trigger_execution_payload_form_id,
];

fn instance_id(v: &Value) -> Option<String> {
    string_at(v, "/triggerInstance/id")
}

fn trigger_execution_trigger_id(v: &Value) -> Option<String> {
    string_at(v, "/triggerExecution/triggerId")
}

fn nested_trigger_id(v: &Value) -> Option<String> {
    string_at(v, "/trigger/id")
}

/// Trigger id, used to reach the reference cache.
pub const TRIGGER_ID: &[Extractor<String>] = &[
    instance_id,
    trigger_execution_trigger_id,
    nested_trigger_id,
];

fn trigger_execution_type(v: &Value) -> Option<String> {
    string_at(v, "/triggerExecution/type")
}

fn instance_type(v: &Value) -> Option<String> {
    string_at(v, "/triggerInstance/type")
}

pub const TRIGGER_TYPE: &[Extractor<String>] = &[trigger_execution_type, instance_type];

fn trigger_execution_inputs(v: &Value) -> Option<Value> {
    object_at(v, "/triggerExecution/inputs")
}

fn trigger_execution_payload_inputs(v: &Value) -> Option<Value> {
    object_at(v, "/triggerExecution/payload/inputs")
}

fn top_level_inputs(v: &Value) -> Option<Value> {
    object_at(v, "/submittedInputs")
}

pub const SUBMITTED_INPUTS: &[Extractor<Value>] = &[
    trigger_execution_inputs,
    trigger_execution_payload_inputs,
    top_level_inputs,
];

fn actor_type(v: &Value) -> Option<String> {
    string_at(v, "/actor/type")
}

pub const ACTOR_TYPE: &[Extractor<String>] = &[actor_type];

fn actor_name(v: &Value) -> Option<String> {
    string_at(v, "/actor/name")
}

fn actor_email(v: &Value) -> Option<String> {
    string_at(v, "/actor/email")
}

fn actor_id(v: &Value) -> Option<String> {
    string_at(v, "/actor/id")
}

/// Best human-readable label for the actor.
pub const ACTOR_LABEL: &[Extractor<String>] = &[actor_name, actor_email, actor_id];

// ---------------------------------------------------------------------------
// Raw trigger payload (Phase 1)
// ---------------------------------------------------------------------------

fn payload_trigger_name(v: &Value) -> Option<String> {
    string_at(v, "/trigger_name")
}

fn payload_name(v: &Value) -> Option<String> {
    string_at(v, "/name")
}

fn payload_nested_trigger_name(v: &Value) -> Option<String> {
    string_at(v, "/trigger/name")
}

pub const PAYLOAD_TRIGGER_NAME: &[Extractor<String>] = &[
    payload_trigger_name,
    payload_name,
    payload_nested_trigger_name,
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_strategy_wins_over_later_ones() {
        let context = json!({
            "triggerInstance": { "formId": "from-instance" },
            "triggerExecution": {
                "formId": "from-execution",
                "payload": { "formId": "from-payload" }
            }
        });
        assert_eq!(first_success(FORM_ID, &context).as_deref(), Some("from-instance"));
    }

    #[test]
    fn later_strategies_are_fallbacks() {
        let context = json!({ "triggerExecution": { "payload": { "formId": "from-payload" } } });
        assert_eq!(first_success(FORM_ID, &context).as_deref(), Some("from-payload"));
    }

    #[test]
    fn blank_strings_do_not_count() {
        let context = json!({
            "triggerInstance": { "formId": "  " },
            "triggerExecution": { "formId": "real" }
        });
        assert_eq!(first_success(FORM_ID, &context).as_deref(), Some("real"));
    }

    #[test]
    fn nothing_found_is_none() {
        assert_eq!(first_success(TRIGGER_ID, &json!({ "actor": { "id": "u1" } })), None);
        assert_eq!(first_success(SUBMITTED_INPUTS, &json!({ "submittedInputs": "text" })), None);
    }

    #[test]
    fn actor_label_prefers_name_then_email() {
        let with_email = json!({ "actor": { "email": "ops@example.com", "id": "u1" } });
        assert_eq!(first_success(ACTOR_LABEL, &with_email).as_deref(), Some("ops@example.com"));
    }
}
