// Standard tool response envelope
// Every payload passes through the redactor and carries a redaction summary;
// list-ish tools also report the limits they applied

use crate::redact::redact_object;
use serde_json::{json, Map, Value};

/// Wrap a tool payload in the standard envelope.
///
/// The payload's fields are spread into the envelope next to `ok`,
/// `session_id`, `limits_applied`, and `redaction_summary`. The whole
/// payload is redacted first.
pub fn envelope(
    session_id: Option<&str>,
    payload: Value,
    limits_applied: Option<Value>,
    degraded: bool,
) -> Value {
    let redacted = redact_object(&payload);

    let mut out = Map::new();
    out.insert("ok".to_string(), json!(true));
    if let Some(session_id) = session_id {
        out.insert("session_id".to_string(), json!(session_id));
    }
    match redacted.value {
        Value::Object(fields) => {
            for (key, value) in fields {
                out.insert(key, value);
            }
        }
        other => {
            out.insert("data".to_string(), other);
        }
    }
    if degraded {
        out.insert("degraded".to_string(), json!(true));
    }
    if let Some(limits) = limits_applied {
        out.insert("limits_applied".to_string(), limits);
    }
    out.insert(
        "redaction_summary".to_string(),
        json!({
            "total_fields": redacted.summary.total_fields,
            "redacted_fields": redacted.summary.redacted_fields,
            "rules_applied": redacted.summary.rules_applied,
        }),
    );
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape_is_stable() {
        let out = envelope(
            Some("s1"),
            json!({"events": [{"message": "password=hunter2"}]}),
            Some(json!({"limit": 20, "offset": 0})),
            false,
        );

        assert_eq!(out["ok"], true);
        assert_eq!(out["session_id"], "s1");
        assert_eq!(out["events"][0]["message"], "password=[PASSWORD]");
        assert_eq!(out["limits_applied"]["limit"], 20);

        let summary = &out["redaction_summary"];
        assert!(summary["total_fields"].as_u64().unwrap() >= 1);
        assert_eq!(summary["redacted_fields"], 1);
        assert_eq!(summary["rules_applied"][0], "password");
    }

    #[test]
    fn degraded_flag_present_only_when_set() {
        let normal = envelope(None, json!({"a": 1}), None, false);
        assert!(normal.get("degraded").is_none());

        let degraded = envelope(None, json!({"a": 1}), None, true);
        assert_eq!(degraded["degraded"], true);
    }

    #[test]
    fn non_object_payload_is_nested_under_data() {
        let out = envelope(None, json!([1, 2, 3]), None, false);
        assert_eq!(out["data"], json!([1, 2, 3]));
        assert!(out["redaction_summary"].is_object());
    }
}
