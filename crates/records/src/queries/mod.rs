//! Query functions: one function per remote operation.
//!
//! Every function takes a `&dyn QueryTransport` and a timeout and returns a
//! `Result<T, QueryError>`. No retry policy and no scheduling, just one request.

pub mod executions;
pub mod catalog;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::QueryError;

/// Pull `data[field]` out of a result payload and decode it.
pub(crate) fn decode_member<T: DeserializeOwned>(
    operation: &'static str,
    mut data: Value,
    field: &'static str,
) -> Result<T, QueryError> {
    let Some(member) = data.get_mut(field).map(Value::take).filter(|v| !v.is_null()) else {
        debug!(operation, field, "result payload has no such member");
        return Err(QueryError::MissingField { operation, field });
    };

    serde_json::from_value(member).map_err(|source| {
        warn!(operation, field, error = %source, "result member does not decode");
        QueryError::Decode { operation, source }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use transport::TransportError;

    #[test]
    fn missing_or_null_member_is_reported_by_name() {
        for data in [json!({}), json!({ "forms": null })] {
            let err = decode_member::<Vec<String>>("ListForms", data, "forms").unwrap_err();
            assert!(matches!(
                err,
                QueryError::MissingField { operation: "ListForms", field: "forms" }
            ));
        }
    }

    #[test]
    fn undecodable_member_is_a_decode_error() {
        let data = json!({ "forms": [1, 2] });
        let err = decode_member::<Vec<String>>("ListForms", data, "forms").unwrap_err();
        assert!(matches!(err, QueryError::Decode { operation: "ListForms", .. }));
        assert!(!err.is_timeout());
    }

    #[test]
    fn transport_timeouts_stay_visible() {
        let err = QueryError::from(TransportError::Timeout {
            operation: "GetExecutionContext".into(),
            timeout_ms: 10,
        });
        assert!(err.is_timeout());
    }
}
