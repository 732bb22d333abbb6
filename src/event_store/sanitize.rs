//! Redaction of well-known sensitive fields before an event is stored.
//!
//! Distinct from [`crate::security::sanitize`]: that module strips unsafe
//! characters from tool-call arguments; this one redacts secret-shaped
//! field values out of outbound event payloads, by field name rather than
//! by content.

use serde_json::Value;

const REDACTED_FIELDS: &[&str] = &["password", "token", "apiKey", "credentials"];
const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Redact well-known sensitive fields anywhere in `value`, operating on a
/// deep copy so the caller's original value is left untouched.
#[must_use]
pub fn redact(value: &Value) -> Value {
    redact_in_place(value.clone())
}

fn redact_in_place(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if REDACTED_FIELDS.contains(&key.as_str()) {
                    out.insert(key, Value::String(REDACTED_PLACEHOLDER.to_string()));
                } else {
                    out.insert(key, redact_in_place(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(redact_in_place).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_top_level_sensitive_fields() {
        let input = json!({"password": "hunter2", "username": "alice"});
        let out = redact(&input);
        assert_eq!(out["password"], "[REDACTED]");
        assert_eq!(out["username"], "alice");
    }

    #[test]
    fn redacts_nested_sensitive_fields() {
        let input = json!({"auth": {"apiKey": "sk-123", "note": "ok"}});
        let out = redact(&input);
        assert_eq!(out["auth"]["apiKey"], "[REDACTED]");
        assert_eq!(out["auth"]["note"], "ok");
    }

    #[test]
    fn redacts_within_arrays() {
        let input = json!([{"token": "abc"}, {"token": "def"}]);
        let out = redact(&input);
        assert_eq!(out[0]["token"], "[REDACTED]");
        assert_eq!(out[1]["token"], "[REDACTED]");
    }

    #[test]
    fn redacts_credentials_field() {
        let input = json!({"credentials": {"user": "x", "pass": "y"}});
        let out = redact(&input);
        assert_eq!(out["credentials"], "[REDACTED]");
    }

    #[test]
    fn leaves_original_value_untouched() {
        let input = json!({"password": "hunter2"});
        let _ = redact(&input);
        assert_eq!(input["password"], "hunter2");
    }

    #[test]
    fn non_sensitive_payload_is_unchanged() {
        let input = json!({"q": "rust async", "num": 10});
        let out = redact(&input);
        assert_eq!(out, input);
    }
}
