//! Process-wide plugin type registry.
//!
//! Maps a plugin-type name to the factories that produce fresh plugin and
//! config instances. Entries are registered at startup and live for the
//! process; `unregister_plugin_type` exists mainly for tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, info};

use conflux_core::naming;
use conflux_core::{ConfigError, Result};

use crate::config::ErasedConfig;
use crate::plugin::{DynPlugin, Erased, Plugin};

type PluginFactory = Arc<dyn Fn() -> Arc<dyn DynPlugin> + Send + Sync>;
type ConfigFactory = Arc<dyn Fn() -> Box<dyn ErasedConfig> + Send + Sync>;

/// Options accepted by [`register_plugin_type`].
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    /// When false, discovery skips configs of this type; instances can only
    /// be added explicitly.
    pub auto_discover: bool,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self { auto_discover: true }
    }
}

#[derive(Clone)]
pub struct PluginTypeEntry {
    pub name: String,
    pub auto_discover: bool,
    new_plugin: PluginFactory,
    new_config: ConfigFactory,
}

impl PluginTypeEntry {
    pub fn new_plugin(&self) -> Arc<dyn DynPlugin> {
        (self.new_plugin)()
    }

    pub fn new_config(&self) -> Box<dyn ErasedConfig> {
        (self.new_config)()
    }
}

impl fmt::Debug for PluginTypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginTypeEntry")
            .field("name", &self.name)
            .field("auto_discover", &self.auto_discover)
            .finish_non_exhaustive()
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, PluginTypeEntry>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register plugin type `P` under `name`.
///
/// An empty `name` is derived from the config type name (`KafkaConfig` ->
/// `kafka`). Registering a name that is already live fails; the name can be
/// reused after [`unregister_plugin_type`]. Returns the registered name.
pub fn register_plugin_type<P>(name: &str, opts: RegisterOptions) -> Result<String>
where
    P: Plugin + Default,
{
    let name = if name.trim().is_empty() {
        naming::derive_plugin_type(naming::type_name_of::<P::Config>())
    } else {
        name.trim().to_string()
    };

    let mut registry = REGISTRY.write();
    if registry.contains_key(&name) {
        return Err(ConfigError::plugin(
            name.clone(),
            format!("plugin type '{name}' is already registered"),
        ));
    }

    let entry = PluginTypeEntry {
        name: name.clone(),
        auto_discover: opts.auto_discover,
        new_plugin: Arc::new(|| Arc::new(Erased(P::default())) as Arc<dyn DynPlugin>),
        new_config: Arc::new(|| Box::new(P::Config::default()) as Box<dyn ErasedConfig>),
    };
    registry.insert(name.clone(), entry);
    info!(plugin_type = %name, auto_discover = opts.auto_discover, "Registered plugin type");
    Ok(name)
}

/// Remove a plugin type. Returns whether it was registered.
pub fn unregister_plugin_type(name: &str) -> bool {
    let removed = REGISTRY.write().remove(name).is_some();
    if removed {
        debug!(plugin_type = %name, "Unregistered plugin type");
    }
    removed
}

/// Sorted names of all registered plugin types.
pub fn list_plugin_types() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY.read().keys().cloned().collect();
    names.sort();
    names
}

pub fn lookup_plugin_type(name: &str) -> Option<PluginTypeEntry> {
    REGISTRY.read().get(name).cloned()
}

/// Shallow clone of the registry for callers that need to iterate.
pub fn plugin_types() -> HashMap<String, PluginTypeEntry> {
    REGISTRY.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseConfig;
    use async_trait::async_trait;
    use conflux_core::{Context, ErrorKind};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct ArchiveConfig {
        base: BaseConfig,
    }
    crate::plugin_config!(ArchiveConfig);

    #[derive(Default)]
    struct Archive;

    #[async_trait]
    impl Plugin for Archive {
        type Config = ArchiveConfig;

        async fn startup(&self, _ctx: &Context, _config: &ArchiveConfig) -> anyhow::Result<()> {
            Ok(())
        }

        async fn reload(&self, _ctx: &Context, _config: &ArchiveConfig) -> anyhow::Result<()> {
            Ok(())
        }

        async fn shutdown(&self, _ctx: &Context) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn derives_name_from_config_type() {
        let name = register_plugin_type::<Archive>("", RegisterOptions::default()).unwrap();
        assert_eq!(name, "archive");
        assert!(list_plugin_types().contains(&"archive".to_string()));

        let entry = lookup_plugin_type("archive").unwrap();
        assert!(entry.auto_discover);
        assert_eq!(entry.new_config().type_name(), "ArchiveConfig");
        assert_eq!(entry.new_plugin().config_type(), "ArchiveConfig");
        assert!(unregister_plugin_type("archive"));
    }

    #[test]
    fn duplicate_registration_fails_until_unregistered() {
        register_plugin_type::<Archive>("registry-dup", RegisterOptions::default()).unwrap();
        let err = register_plugin_type::<Archive>("registry-dup", RegisterOptions::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PluginFailure);
        assert!(err.message.contains("already registered"));

        assert!(unregister_plugin_type("registry-dup"));
        assert!(!unregister_plugin_type("registry-dup"));
        register_plugin_type::<Archive>("registry-dup", RegisterOptions::default()).unwrap();
        assert!(plugin_types().contains_key("registry-dup"));
        unregister_plugin_type("registry-dup");
    }
}
