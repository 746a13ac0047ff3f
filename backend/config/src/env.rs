//! Environment variables as a config source, plus `${VAR}` substitution in
//! merged values.
//!
//! Substitution only matches uppercase `[A-Z_][A-Z0-9_]*` names; `$${VAR}`
//! escapes to a literal `${VAR}`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

use conflux_core::{ConfigError, Result};

use crate::merge::set_path;
use crate::provider::{Provider, ProviderKind};

/// Maps a full variable name to a config key. An empty key drops the
/// variable.
pub type KeyTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Reads prefix-filtered environment variables as a nested map.
///
/// Without a transform, `APP_SERVER_HOST` with prefix `APP_` becomes
/// `server.host`. Values stay strings; the decoder coerces them to the
/// field types.
#[derive(Clone)]
pub struct EnvProvider {
    prefix: String,
    delimiter: String,
    transform: Option<KeyTransform>,
    vars: Option<HashMap<String, String>>,
}

impl fmt::Debug for EnvProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvProvider")
            .field("prefix", &self.prefix)
            .field("delimiter", &self.delimiter)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl EnvProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: ".".to_string(),
            transform: None,
            vars: None,
        }
    }

    /// Keys produced by `transform` are split on `delimiter` into nested
    /// maps. An empty delimiter keeps keys flat.
    pub fn with_transform(
        prefix: impl Into<String>,
        delimiter: impl Into<String>,
        transform: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: delimiter.into(),
            transform: Some(Arc::new(transform)),
            vars: None,
        }
    }

    /// Read from a fixed set of variables instead of the process
    /// environment.
    pub fn with_vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.vars = Some(vars.into_iter().collect());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key_for(&self, var: &str) -> String {
        match &self.transform {
            Some(transform) => transform(var),
            None => var[self.prefix.len()..].to_lowercase().replace('_', "."),
        }
    }

    fn snapshot(&self) -> Vec<(String, String)> {
        match &self.vars {
            Some(vars) => vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            None => process_env().collect(),
        }
    }
}

/// Process environment, skipping entries that are not valid UTF-8.
fn process_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}

#[async_trait]
impl Provider for EnvProvider {
    fn name(&self) -> String {
        format!("env:{}", self.prefix)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Structured
    }

    async fn read(&self) -> Result<Map<String, Value>> {
        let mut vars: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|(k, _)| k.starts_with(&self.prefix))
            .collect();
        // Deterministic when two variables map onto the same key.
        vars.sort();

        let mut out = Map::new();
        for (var, value) in vars {
            let key = self.key_for(&var);
            if key.is_empty() {
                continue;
            }
            let value = Value::String(value);
            if self.delimiter.is_empty() {
                out.insert(key, value);
            } else {
                let parts: Vec<&str> = key.split(self.delimiter.as_str()).filter(|p| !p.is_empty()).collect();
                if parts.is_empty() {
                    continue;
                }
                set_path(&mut out, &parts, value);
            }
        }
        debug!(prefix = %self.prefix, keys = out.len(), "Read environment");
        Ok(out)
    }
}

/// Matches `${VAR}` and the escaped form `$${VAR}` in one pass.
static ENV_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(\$)?\{([A-Z_][A-Z0-9_]*)\}").unwrap());

#[derive(Debug, thiserror::Error)]
#[error("missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

impl From<MissingEnvVarError> for ConfigError {
    fn from(err: MissingEnvVarError) -> Self {
        ConfigError::merge(err.config_path.clone(), err.to_string()).with_cause(err)
    }
}

/// Substitute `${VAR}` references in every string leaf of `value` from the
/// process environment. Unset or empty variables are an error.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    resolve_env_vars_with(value, &process_env().collect())
}

/// Same as [`resolve_env_vars`] with an explicit variable table.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "").map_err(ConfigError::from)
}

fn substitute_value(
    value: &Value,
    env: &HashMap<String, String>,
    path: &str,
) -> std::result::Result<Value, MissingEnvVarError> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                let child = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                out.insert(k.clone(), substitute_value(v, env, &child)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    s: &str,
    env: &HashMap<String, String>,
    path: &str,
) -> std::result::Result<String, MissingEnvVarError> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing = None;
    let out = ENV_REF.replace_all(s, |caps: &Captures| {
        let name = &caps[2];
        if caps.get(1).is_some() {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(v) if !v.is_empty() => v.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    match missing {
        Some(err) => Err(err),
        None => Ok(out.into_owned()),
    }
}

pub fn contains_env_var_reference(s: &str) -> bool {
    ENV_REF.captures_iter(s).any(|c| c.get(1).is_none())
}

/// Every variable name referenced in `value`, sorted and deduplicated.
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    let mut vars = Vec::new();
    collect_vars(value, &mut vars);
    vars.sort();
    vars.dedup();
    vars
}

fn collect_vars(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(
            ENV_REF
                .captures_iter(s)
                .filter(|c| c.get(1).is_none())
                .map(|c| c[2].to_string()),
        ),
        Value::Array(arr) => arr.iter().for_each(|v| collect_vars(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_vars(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::ErrorKind;
    use serde_json::json;

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_entries_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        std::env::set_var("CONFLUX_ENV_RAW_BYTES", OsStr::from_bytes(b"\xff\xfe"));
        std::env::set_var("CONFLUX_ENV_UTF8_NAME", "kept");
        let map = EnvProvider::new("CONFLUX_ENV_").read().await.unwrap();
        let resolved = resolve_env_vars(&json!("${CONFLUX_ENV_UTF8_NAME}")).unwrap();
        std::env::remove_var("CONFLUX_ENV_RAW_BYTES");

        assert_eq!(Value::Object(map), json!({"utf8": {"name": "kept"}}));
        assert_eq!(resolved, "kept");
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn prefix_filter_and_default_nesting() {
        let provider = EnvProvider::new("TEST_").with_vars(vars(&[
            ("TEST_SERVER_HOST", "envhost"),
            ("TEST_SERVER_PORT", "9090"),
            ("OTHER_SERVER_HOST", "ignored"),
        ]));
        let map = provider.read().await.unwrap();
        assert_eq!(Value::Object(map), json!({"server": {"host": "envhost", "port": "9090"}}));
    }

    #[tokio::test]
    async fn custom_transform_and_delimiter() {
        let provider = EnvProvider::with_transform("APP_", "__", |var| {
            var.trim_start_matches("APP_").to_lowercase()
        })
        .with_vars(vars(&[
            ("APP_KAFKA_PRODUCER__TOPIC", "orders"),
            ("APP_LOG_LEVEL", "debug"),
        ]));
        let map = provider.read().await.unwrap();
        assert_eq!(map["kafka_producer"]["topic"], "orders");
        assert_eq!(map["log_level"], "debug");
    }

    #[tokio::test]
    async fn empty_transformed_key_is_dropped() {
        let provider = EnvProvider::with_transform("APP_", ".", |_| String::new())
            .with_vars(vars(&[("APP_X", "1")]));
        assert!(provider.read().await.unwrap().is_empty());
    }

    #[test]
    fn substitutes_nested_strings() {
        let v = json!({"db": {"url": "postgres://${DB_HOST}/app"}, "list": ["${DB_HOST}"]});
        let env = HashMap::from([("DB_HOST".to_string(), "db.local".to_string())]);
        let out = resolve_env_vars_with(&v, &env).unwrap();
        assert_eq!(out["db"]["url"], "postgres://db.local/app");
        assert_eq!(out["list"][0], "db.local");
    }

    #[test]
    fn escaped_reference_is_literal() {
        let v = json!({"tpl": "$${HOME_DIR} and ${NAME}"});
        let env = HashMap::from([("NAME".to_string(), "x".to_string())]);
        let out = resolve_env_vars_with(&v, &env).unwrap();
        assert_eq!(out["tpl"], "${HOME_DIR} and x");
        assert_eq!(collect_referenced_vars(&v), vec!["NAME"]);
        assert!(!contains_env_var_reference("$${HOME_DIR}"));
    }

    #[test]
    fn missing_var_is_merge_failure_with_path() {
        let v = json!({"auth": {"token": "${MISSING_TOKEN}"}});
        let err = resolve_env_vars_with(&v, &HashMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MergeFailure);
        assert_eq!(err.source_id, "auth.token");
        assert!(err.message.contains("MISSING_TOKEN"));
    }
}
