//! Composition: merge providers, apply defaults, decode, validate.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use conflux_core::{ConfigError, Result};
use conflux_plugins::Visit;

use crate::decode;
use crate::defaults::{apply_defaults, Defaults};
use crate::env::resolve_env_vars;
use crate::merge::merge_into;
use crate::provider::{provider_config, ProviderConfig, Source};
use crate::redact::redact_map;
use crate::validation::{validate_config, Validate, ValidateFields};

/// Everything a type needs to be composed, published and walked for plugins.
pub trait AppConfig:
    Serialize
    + DeserializeOwned
    + Default
    + Defaults
    + ValidateFields
    + Validate
    + Visit
    + Send
    + Sync
    + 'static
{
}

impl<T> AppConfig for T where
    T: Serialize
        + DeserializeOwned
        + Default
        + Defaults
        + ValidateFields
        + Validate
        + Visit
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeOptions {
    /// Replace `${VAR}` references in merged string values.
    pub substitute_env: bool,
}

/// Read every provider in order and deep-merge the results; later providers
/// win on conflicting keys.
pub async fn merge_providers(providers: &[ProviderConfig]) -> Result<Map<String, Value>> {
    let mut merged = Map::new();
    for pc in providers {
        let name = pc.provider.name();
        let map = pc.load().await?;
        debug!(provider = %name, keys = map.len(), "Read provider");
        merge_into(&mut merged, map);
    }
    Ok(merged)
}

/// Build a `T` from providers. Performs no I/O besides provider reads.
pub async fn compose<T: AppConfig>(providers: &[ProviderConfig], options: ComposeOptions) -> Result<T> {
    let mut merged = merge_providers(providers).await?;

    if options.substitute_env {
        merged = match resolve_env_vars(&Value::Object(merged))? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
    }
    if tracing::enabled!(tracing::Level::TRACE) {
        trace!(config = %redact_map(&merged), "Merged provider data");
    }

    let mut config = T::default();
    apply_defaults(&mut config)?;

    let mut value = serde_json::to_value(&config).map_err(|e| {
        ConfigError::merge("defaults", format!("cannot serialize defaulted config: {e}")).with_cause(e)
    })?;
    match &mut value {
        Value::Object(base) => merge_into(base, merged),
        _ if merged.is_empty() => {}
        _ => {
            return Err(ConfigError::merge(
                "defaults",
                "config type does not serialize to a map, cannot merge provider data into it",
            ))
        }
    }

    let config: T = decode::from_value(value).map_err(|e| {
        let source = if e.path.is_empty() { "config".to_string() } else { e.path.clone() };
        ConfigError::parse(source, format!("cannot decode config: {e}")).with_cause(e)
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Compose once from `sources` without creating a manager.
pub async fn load<T, I, S>(sources: I) -> Result<T>
where
    T: AppConfig,
    I: IntoIterator<Item = S>,
    S: Into<Source>,
{
    let providers = sources
        .into_iter()
        .map(|s| provider_config(s.into()))
        .collect::<Result<Vec<_>>>()?;
    if providers.is_empty() {
        return Err(ConfigError::unsupported_source("no configuration sources given"));
    }
    compose(&providers, ComposeOptions::default()).await
}

/// [`load`] that panics on error.
pub async fn must_load<T, I, S>(sources: I) -> T
where
    T: AppConfig,
    I: IntoIterator<Item = S>,
    S: Into<Source>,
{
    match load(sources).await {
        Ok(config) => config,
        Err(e) => panic!("conflux: failed to load configuration: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::DefaultsWalker;
    use crate::memory::{BytesProvider, MemoryProvider};
    use crate::provider::Provider;
    use crate::validation::FieldValidator;
    use conflux_core::ErrorKind;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Server {
        host: String,
        port: u16,
    }

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct App {
        name: String,
        #[serde(with = "conflux_core::duration::serde_str")]
        timeout: Duration,
        server: Server,
    }

    impl Defaults for App {
        fn apply_defaults(&mut self, d: &mut DefaultsWalker) -> Result<()> {
            d.field("name", &mut self.name, "test-app")?;
            d.field("timeout", &mut self.timeout, "30s")
        }
    }

    impl ValidateFields for App {
        fn validate_fields(&self, v: &mut FieldValidator) {
            v.check("server.port", &self.server.port).max(9999);
        }
    }

    impl Validate for App {}

    impl Visit for App {
        fn visit(&self, _v: &mut conflux_plugins::Visitor) -> Result<()> {
            Ok(())
        }
    }

    fn memory(data: Value) -> ProviderConfig {
        let provider = MemoryProvider::new("t").with_data(data.as_object().cloned().unwrap());
        provider_config(Source::Provider(Arc::new(provider))).unwrap()
    }

    #[tokio::test]
    async fn later_provider_wins() {
        let providers = vec![
            memory(json!({"server": {"host": "a", "port": 1}})),
            memory(json!({"server": {"host": "b"}})),
        ];
        let app: App = compose(&providers, ComposeOptions::default()).await.unwrap();
        assert_eq!(app.server, Server { host: "b".into(), port: 1 });
        assert_eq!(app.name, "test-app");
        assert_eq!(app.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn provider_values_override_defaults() {
        let providers = vec![memory(json!({"name": "svc", "timeout": "2m"}))];
        let app: App = compose(&providers, ComposeOptions::default()).await.unwrap();
        assert_eq!(app.name, "svc");
        assert_eq!(app.timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn decode_and_validation_errors_are_typed() {
        let providers = vec![memory(json!({"server": {"port": "http"}}))];
        let err = compose::<App>(&providers, ComposeOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseFailure);
        assert_eq!(err.source_id, "server.port");

        let providers = vec![memory(json!({"server": {"port": 10000}}))];
        let err = compose::<App>(&providers, ComposeOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailure);
        assert_eq!(err.source_id, "server.port");
    }

    #[tokio::test]
    async fn env_substitution_is_opt_in() {
        std::env::set_var("CONFLUX_PIPELINE_HOST", "subst");
        let providers = vec![memory(json!({"server": {"host": "${CONFLUX_PIPELINE_HOST}"}}))];
        let plain: App = compose(&providers, ComposeOptions::default()).await.unwrap();
        assert_eq!(plain.server.host, "${CONFLUX_PIPELINE_HOST}");
        let substituted: App = compose(&providers, ComposeOptions { substitute_env: true })
            .await
            .unwrap();
        assert_eq!(substituted.server.host, "subst");
    }

    #[tokio::test]
    async fn load_from_bytes_provider() {
        let bytes: Arc<dyn Provider> = Arc::new(BytesProvider::new(r#"{"server":{"port":"8081"}}"#));
        let app: App = load([Source::Provider(bytes)]).await.unwrap();
        assert_eq!(app.server.port, 8081);

        let err = load::<App, _, Source>(Vec::<Source>::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedSource);
    }
}
