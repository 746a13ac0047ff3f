//! Masking of sensitive values before merged config maps are logged.

use serde_json::{Map, Value};

/// Keys whose string values are never logged in full. Compared
/// case-insensitively after removing `_` and `-`.
static SENSITIVE_KEYS: &[&str] = &[
    "apikey",
    "accesskey",
    "secretkey",
    "privatekey",
    "accesstoken",
    "refreshtoken",
    "token",
    "secret",
    "password",
    "passwd",
    "credentials",
    "dsn",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    SENSITIVE_KEYS.iter().any(|k| normalized == *k || normalized.ends_with(k))
}

/// Copy of `value` with sensitive string leaves masked.
///
/// Long secrets keep a four character hint so operators can tell which one
/// is configured.
pub fn redact(value: &Value) -> Value {
    redact_value(value, false)
}

pub fn redact_map(map: &Map<String, Value>) -> Value {
    redact(&Value::Object(map.clone()))
}

fn redact_value(value: &Value, sensitive: bool) -> Value {
    match value {
        Value::String(s) if sensitive && !s.is_empty() => {
            if s.chars().count() > 8 {
                Value::String(format!("{}***", s.chars().take(4).collect::<String>()))
            } else {
                Value::String("***".to_string())
            }
        }
        Value::Number(_) | Value::Bool(_) if sensitive => Value::String("***".to_string()),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, sensitive)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, sensitive || is_sensitive_key(k))))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Dotted paths of every leaf [`redact`] would mask.
pub fn collect_redacted_paths(value: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths(value, "", false, &mut paths);
    paths
}

fn collect_paths(value: &Value, path: &str, sensitive: bool, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let child = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                collect_paths(v, &child, sensitive || is_sensitive_key(k), out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                collect_paths(v, &format!("{path}[{i}]"), sensitive, out);
            }
        }
        Value::Null => {}
        Value::String(s) if s.is_empty() => {}
        _ if sensitive => out.push(path.to_string()),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_sensitive_keys_with_hint() {
        let v = json!({"db": {"password": "hunter2", "api_key": "sk-abcdef123456", "host": "db"}});
        let r = redact(&v);
        assert_eq!(r["db"]["password"], "***");
        assert_eq!(r["db"]["api_key"], "sk-a***");
        assert_eq!(r["db"]["host"], "db");
    }

    #[test]
    fn masks_whole_subtree_under_sensitive_key() {
        let v = json!({"credentials": {"user": "u", "pin": 1234}, "tokens": ["x"]});
        let r = redact(&v);
        assert_eq!(r["credentials"]["user"], "***");
        assert_eq!(r["credentials"]["pin"], "***");
        assert_eq!(r["tokens"][0], "x", "plural key is not a secret");
    }

    #[test]
    fn lists_redacted_paths() {
        let v = json!({"kafka": {"sasl-password": "p", "topic": "t"}, "refreshToken": ""});
        assert_eq!(collect_redacted_paths(&v), vec!["kafka.sasl-password"]);
    }
}
