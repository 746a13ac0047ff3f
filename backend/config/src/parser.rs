//! Parsers turning raw provider bytes into a nested key/value map.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};

use conflux_core::{ConfigError, Result};

/// Turns raw bytes into a nested map.
pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(&self, source_id: &str, bytes: &[u8]) -> Result<Map<String, Value>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlParser;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

/// An empty document, or one that is only whitespace, is an empty map.
fn expect_object(source_id: &str, format: &str, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ConfigError::parse(
            source_id,
            format!("{format} document must be a mapping at the top level, got {}", kind_of(&other)),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

impl Parser for YamlParser {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn parse(&self, source_id: &str, bytes: &[u8]) -> Result<Map<String, Value>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        let value: Value = serde_yaml::from_slice(bytes).map_err(|e| {
            ConfigError::parse(source_id, format!("invalid YAML: {e}")).with_cause(e)
        })?;
        expect_object(source_id, "YAML", value)
    }
}

impl Parser for JsonParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, source_id: &str, bytes: &[u8]) -> Result<Map<String, Value>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            ConfigError::parse(source_id, format!("invalid JSON: {e}")).with_cause(e)
        })?;
        expect_object(source_id, "JSON", value)
    }
}

/// Parser chosen by file extension: `.json` is JSON, everything else
/// (including no extension) is YAML.
pub fn parser_for_path(path: &Path) -> Arc<dyn Parser> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("json") => Arc::new(JsonParser),
        _ => Arc::new(YamlParser),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::ErrorKind;

    #[test]
    fn picks_parser_by_extension() {
        assert_eq!(parser_for_path(Path::new("cfg.yaml")).name(), "yaml");
        assert_eq!(parser_for_path(Path::new("cfg.YML")).name(), "yaml");
        assert_eq!(parser_for_path(Path::new("cfg.json")).name(), "json");
        assert_eq!(parser_for_path(Path::new("cfg.toml")).name(), "yaml");
        assert_eq!(parser_for_path(Path::new("config")).name(), "yaml");
    }

    #[test]
    fn yaml_nested_mapping() {
        let map = YamlParser
            .parse("cfg.yaml", b"server:\n  host: filehost\n  port: 8080\n")
            .unwrap();
        assert_eq!(map["server"]["host"], "filehost");
        assert_eq!(map["server"]["port"], 8080);
    }

    #[test]
    fn empty_documents_are_empty_maps() {
        assert!(YamlParser.parse("a", b"").unwrap().is_empty());
        assert!(JsonParser.parse("a", b"  \n").unwrap().is_empty());
        assert!(JsonParser.parse("a", b"{}").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_mapping_and_garbage() {
        let err = JsonParser.parse("cfg.json", b"[1,2]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseFailure);
        assert!(err.message.contains("sequence"));

        let err = JsonParser.parse("cfg.json", b"{nope").unwrap_err();
        assert_eq!(err.source_id, "cfg.json");
    }
}
