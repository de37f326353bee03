// Safe-mode payload policy
// Whole categories are dropped; sensitive fields and cookie-bearing strings
// are replaced with a fixed marker

use serde_json::Value;

/// Marker written in place of values removed by safe mode.
pub const SAFE_MODE_MARKER: &str = "[REDACTED_SAFE_MODE]";

/// Event categories that are dropped entirely under safe mode.
const DROPPED_CATEGORIES: &[&str] = &["storage", "cookie-dump"];

/// Field names whose entire value (subtree included) is replaced.
const SENSITIVE_FIELDS: &[&str] = &[
    "inputValue",
    "cookieHeader",
    "localStorageDump",
    "sessionStorageDump",
];

/// Substrings that mark a string value as cookie-bearing.
const COOKIE_MARKERS: &[&str] = &["Cookie:", "Set-Cookie:"];

/// Apply the safe-mode policy to one event payload.
///
/// Returns `None` when the whole event must be dropped (category policy);
/// otherwise returns the payload with sensitive fields masked.
pub fn apply_safe_mode(category: &str, payload: &Value) -> Option<Value> {
    if DROPPED_CATEGORIES.contains(&category) {
        return None;
    }
    Some(mask(payload))
}

fn mask(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if SENSITIVE_FIELDS.contains(&key.as_str()) {
                    out.insert(key.clone(), Value::String(SAFE_MODE_MARKER.to_string()));
                } else {
                    out.insert(key.clone(), mask(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(mask).collect()),
        Value::String(s) => {
            if COOKIE_MARKERS.iter().any(|marker| s.contains(marker)) {
                Value::String(SAFE_MODE_MARKER.to_string())
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn storage_category_dropped() {
        assert!(apply_safe_mode("storage", &json!({"anything": 1})).is_none());
        assert!(apply_safe_mode("cookie-dump", &json!({})).is_none());
    }

    #[test]
    fn console_payload_masked_field_by_field() {
        let payload = json!({
            "inputValue": "secret text",
            "nested": {
                "cookieHeader": "Cookie: auth=abc123",
                "localStorageDump": {"token": "abc"},
            },
            "message": "Set-Cookie: refreshToken=xyz",
            "status": "ok",
        });

        let masked = apply_safe_mode("console", &payload).unwrap();
        assert_eq!(
            masked,
            json!({
                "inputValue": "[REDACTED_SAFE_MODE]",
                "nested": {
                    "cookieHeader": "[REDACTED_SAFE_MODE]",
                    "localStorageDump": "[REDACTED_SAFE_MODE]",
                },
                "message": "[REDACTED_SAFE_MODE]",
                "status": "ok",
            })
        );
    }

    #[test]
    fn sensitive_subtree_collapses_to_marker() {
        let payload = json!({"localStorageDump": {"a": 1, "b": {"c": 2}}});
        let masked = apply_safe_mode("click", &payload).unwrap();
        assert_eq!(masked["localStorageDump"], "[REDACTED_SAFE_MODE]");
    }

    #[test]
    fn plain_strings_pass_through() {
        let payload = json!({"message": "clicked the button", "count": 2});
        let masked = apply_safe_mode("click", &payload).unwrap();
        assert_eq!(masked, payload);
    }

    #[test]
    fn arrays_are_walked() {
        let payload = json!({"lines": ["ok", "Cookie: sid=1"]});
        let masked = apply_safe_mode("console", &payload).unwrap();
        assert_eq!(masked["lines"][0], "ok");
        assert_eq!(masked["lines"][1], "[REDACTED_SAFE_MODE]");
    }
}
