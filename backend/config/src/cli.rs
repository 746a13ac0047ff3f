//! Command-line flags as a config source.
//!
//! Only flags the user actually passed contribute; values that come from
//! clap defaults or the environment are left out so this provider can sit on
//! top of file and env sources without clobbering them.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::parser::ValueSource;
use clap::ArgMatches;
use serde_json::{json, Map, Value};
use tracing::debug;

use conflux_core::{format_duration, ConfigError, Result};

use crate::merge::unflatten;
use crate::provider::{Provider, ProviderKind};

#[derive(Debug, Clone)]
pub struct CliFlagsProvider {
    matches: ArgMatches,
    delimiter: String,
}

impl CliFlagsProvider {
    /// `delimiter` splits flag ids into nested keys (`server.port` with
    /// `"."`); an empty delimiter keeps them flat.
    pub fn new(matches: ArgMatches, delimiter: impl Into<String>) -> Self {
        Self {
            matches,
            delimiter: delimiter.into(),
        }
    }

    /// Explicitly set flags, keyed by arg id, before unflattening.
    pub fn flags(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for id in self.matches.ids() {
            let id = id.as_str();
            if self.matches.value_source(id) != Some(ValueSource::CommandLine) {
                continue;
            }
            if let Some(value) = flag_value(&self.matches, id) {
                out.insert(id.to_string(), value);
            }
        }
        out
    }
}

macro_rules! try_one {
    ($m:expr, $id:expr; $($ty:ty),+) => {$(
        if let Ok(Some(v)) = $m.try_get_one::<$ty>($id) {
            return Some(json!(v));
        }
    )+};
}

macro_rules! try_many {
    ($m:expr, $id:expr; $($ty:ty),+) => {$(
        if let Ok(Some(values)) = $m.try_get_many::<$ty>($id) {
            return Some(Value::Array(values.map(|v| json!(v)).collect()));
        }
    )+};
}

/// The flag's value in its declared type, falling back to the raw string.
fn flag_value(m: &ArgMatches, id: &str) -> Option<Value> {
    let raw: Vec<String> = m
        .try_get_raw(id)
        .ok()
        .flatten()
        .map(|values| values.map(|v| v.to_string_lossy().into_owned()).collect())
        .unwrap_or_default();

    if raw.len() > 1 {
        try_many!(m, id; String, i64, u64, i32, u32, f64);
        return Some(Value::Array(raw.into_iter().map(Value::String).collect()));
    }

    try_one!(m, id; bool, String, i64, u64, i32, u32, u16, u8, usize, f64, f32);
    if let Ok(Some(path)) = m.try_get_one::<PathBuf>(id) {
        return Some(Value::String(path.display().to_string()));
    }
    if let Ok(Some(d)) = m.try_get_one::<Duration>(id) {
        return Some(Value::String(format_duration(*d)));
    }
    raw.into_iter().next().map(Value::String)
}

#[async_trait]
impl Provider for CliFlagsProvider {
    fn name(&self) -> String {
        "cli-flags".to_string()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Structured
    }

    async fn read(&self) -> Result<Map<String, Value>> {
        let flags = self.flags();
        debug!(flags = flags.len(), "Read command-line flags");
        Ok(unflatten(flags, &self.delimiter))
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        Err(ConfigError::unsupported_source(
            "cli-flags provider does not support raw bytes; read it as structured data",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{value_parser, Arg, ArgAction, Command};
    use conflux_core::ErrorKind;

    fn command() -> Command {
        Command::new("app")
            .arg(Arg::new("server.host").long("server.host").default_value("localhost"))
            .arg(
                Arg::new("server.port")
                    .long("server.port")
                    .value_parser(value_parser!(u16))
                    .default_value("8080"),
            )
            .arg(Arg::new("debug").long("debug").action(ArgAction::SetTrue))
            .arg(Arg::new("tags").long("tag").action(ArgAction::Append))
            .arg(Arg::new("ratio").long("ratio").value_parser(value_parser!(f64)))
    }

    #[tokio::test]
    async fn only_explicit_flags_are_read() {
        let matches = command()
            .try_get_matches_from(["app", "--server.port", "9090", "--debug"])
            .unwrap();
        let map = CliFlagsProvider::new(matches, ".").read().await.unwrap();
        assert_eq!(Value::Object(map), json!({"server": {"port": 9090}, "debug": true}));
    }

    #[tokio::test]
    async fn typed_values_and_repeated_flags() {
        let matches = command()
            .try_get_matches_from(["app", "--tag", "a", "--tag", "b", "--ratio", "0.5"])
            .unwrap();
        let flags = CliFlagsProvider::new(matches, "").flags();
        assert_eq!(flags["tags"], json!(["a", "b"]));
        assert_eq!(flags["ratio"], json!(0.5));
    }

    #[tokio::test]
    async fn empty_delimiter_keeps_keys_flat() {
        let matches = command()
            .try_get_matches_from(["app", "--server.host", "cli"])
            .unwrap();
        let map = CliFlagsProvider::new(matches, "").read().await.unwrap();
        assert_eq!(map["server.host"], "cli");
    }

    #[tokio::test]
    async fn raw_bytes_are_unsupported() {
        let matches = command().try_get_matches_from(["app"]).unwrap();
        let err = CliFlagsProvider::new(matches, ".").read_bytes().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedSource);
    }
}
