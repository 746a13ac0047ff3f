//! Per-manager collection of plugin instances keyed by `type:path`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use conflux_core::naming;
use conflux_core::{ConfigError, Context, Result};

use crate::config::{plugin_type_of, ErasedConfig, PluginConfig};
use crate::lifecycle::{self, PluginState};
use crate::plugin::{DynPlugin, Erased, Plugin};
use crate::registry;
use crate::tree::{collect_slots, Visit};

/// One registered plugin instance.
pub struct InstanceEntry {
    pub key: String,
    pub plugin_type: String,
    /// Lowercased instance name; empty for explicitly added plugins.
    pub name: String,
    /// Field path the config was discovered at; empty for explicitly added
    /// plugins.
    pub path: String,
    pub(crate) plugin: Arc<dyn DynPlugin>,
    config: Mutex<Arc<dyn ErasedConfig>>,
    state: Mutex<PluginState>,
}

impl InstanceEntry {
    fn new(
        key: String,
        plugin_type: String,
        path: String,
        plugin: Arc<dyn DynPlugin>,
        config: Arc<dyn ErasedConfig>,
    ) -> Self {
        Self {
            key,
            plugin_type,
            name: naming::instance_name(&path),
            path,
            plugin,
            config: Mutex::new(config),
            state: Mutex::new(PluginState::Registered),
        }
    }

    /// Current config. The stored value is swapped wholesale on reload, so
    /// the returned handle never changes underneath the caller.
    pub fn config(&self) -> Arc<dyn ErasedConfig> {
        self.config.lock().clone()
    }

    pub(crate) fn replace_config(&self, config: Arc<dyn ErasedConfig>) {
        *self.config.lock() = config;
    }

    pub fn state(&self) -> PluginState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: PluginState) {
        *self.state.lock() = state;
    }

    pub fn is_started(&self) -> bool {
        self.state() == PluginState::Active
    }
}

/// Discovers, starts, reloads and stops the plugin instances of one config
/// manager.
///
/// Instances are kept in registration order. Discovery and shutdown take the
/// write lock; startup and reload take the read lock, and plugin callbacks
/// run while it is held.
#[derive(Default)]
pub struct PluginManager {
    entries: RwLock<Vec<Arc<InstanceEntry>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `config` and register one instance per plugin config found.
    ///
    /// Fails on pointer plugin configs, unknown plugin types and duplicate
    /// keys; nothing is registered when any slot fails. Returns the keys
    /// added, in discovery order.
    pub async fn discover_and_register(&self, config: &dyn Visit) -> Result<Vec<String>> {
        let slots = collect_slots(config)?;
        let mut entries = self.entries.write().await;

        let mut taken: HashSet<String> = entries.iter().map(|e| e.key.clone()).collect();
        let mut discovered = Vec::with_capacity(slots.len());

        for slot in slots {
            let plugin_type = plugin_type_of(slot.config.as_ref());
            let Some(entry_type) = registry::lookup_plugin_type(&plugin_type) else {
                return Err(ConfigError::plugin(
                    slot.path.clone(),
                    format!("no registered plugin type for {plugin_type} (config field '{}')", slot.path),
                ));
            };
            if !entry_type.auto_discover {
                debug!(plugin_type = %plugin_type, path = %slot.path, "Auto-discovery disabled; skipping");
                continue;
            }

            let mut fresh = entry_type.new_config();
            if !fresh.assign_from(slot.config.as_ref()) {
                return Err(ConfigError::plugin(
                    slot.path.clone(),
                    format!(
                        "config field '{}' has type {} but plugin type '{plugin_type}' expects {}",
                        slot.path,
                        slot.config.type_name(),
                        fresh.type_name()
                    ),
                ));
            }

            let key = naming::instance_key(&plugin_type, &slot.path);
            if !taken.insert(key.clone()) {
                return Err(ConfigError::plugin(
                    key.clone(),
                    format!("plugin instance '{key}' is already registered"),
                ));
            }

            discovered.push(Arc::new(InstanceEntry::new(
                key,
                plugin_type,
                slot.path,
                entry_type.new_plugin(),
                Arc::from(fresh),
            )));
        }

        let keys: Vec<String> = discovered.iter().map(|e| e.key.clone()).collect();
        for entry in &discovered {
            info!(plugin = %entry.key, path = %entry.path, "Discovered plugin instance");
        }
        entries.extend(discovered);
        Ok(keys)
    }

    /// Register an explicitly constructed plugin under `name` (may be empty).
    pub async fn add<P: Plugin>(&self, name: &str, plugin: P, config: P::Config) -> Result<String> {
        let plugin_type = plugin_type_of(&config);
        let key = naming::instance_key(&plugin_type, name);

        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.key == key) {
            return Err(ConfigError::plugin(
                key.clone(),
                format!("plugin instance '{key}' is already registered"),
            ));
        }
        entries.push(Arc::new(InstanceEntry::new(
            key.clone(),
            plugin_type,
            name.to_string(),
            Arc::new(Erased(plugin)),
            Arc::new(config),
        )));
        info!(plugin = %key, "Added plugin instance");
        Ok(key)
    }

    /// Start every instance that is not running, in registration order.
    /// The first failure aborts; instances started before it stay started.
    pub async fn startup(&self, ctx: &Context) -> Result<()> {
        let entries = self.entries.read().await;
        for entry in entries.iter().filter(|e| !e.is_started()) {
            ctx.check(&entry.key)?;
            lifecycle::run_startup(entry, ctx).await?;
        }
        Ok(())
    }

    /// Stop every running instance in reverse registration order. All
    /// instances are attempted; the first error is returned.
    pub async fn shutdown(&self, ctx: &Context) -> Result<()> {
        let entries = self.entries.write().await;
        let mut first_err = None;
        for entry in entries.iter().rev().filter(|e| e.is_started()) {
            if let Err(err) = lifecycle::run_shutdown(entry, ctx).await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Reconcile running instances with a new config tree.
    ///
    /// Only plugin configs whose value differs between `old` and `new` are
    /// touched. Running instances get `reload`; instances that are not
    /// running just take the new config for their next startup. All changed
    /// instances are attempted; the first error is returned.
    pub async fn reload(&self, ctx: &Context, old: &dyn Visit, new: &dyn Visit) -> Result<()> {
        let entries = self.entries.read().await;
        if entries.is_empty() {
            return Ok(());
        }

        let mut previous: HashMap<String, Box<dyn ErasedConfig>> = collect_slots(old)?
            .into_iter()
            .map(|slot| (slot.path, slot.config))
            .collect();

        let mut first_err = None;
        for slot in collect_slots(new)? {
            let Some(before) = previous.remove(&slot.path) else {
                continue;
            };
            if before.eq_erased(slot.config.as_ref()) {
                continue;
            }

            let key = naming::instance_key(&plugin_type_of(slot.config.as_ref()), &slot.path);
            let Some(entry) = entries.iter().find(|e| e.key == key) else {
                debug!(plugin = %key, "Changed config has no plugin instance; skipping");
                continue;
            };

            let config: Arc<dyn ErasedConfig> = Arc::from(slot.config);
            if !entry.is_started() {
                entry.replace_config(config);
                continue;
            }
            if let Err(err) = lifecycle::run_reload(entry, ctx, config).await {
                first_err.get_or_insert(err);
            }
        }

        if let Some(err) = &first_err {
            warn!(error = %err, "Plugin reconciliation finished with errors");
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Instance keys in registration order.
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.iter().map(|e| e.key.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get(&self, key: &str) -> Option<Arc<InstanceEntry>> {
        self.entries.read().await.iter().find(|e| e.key == key).cloned()
    }

    pub async fn is_started(&self, key: &str) -> bool {
        self.get(key).await.is_some_and(|e| e.is_started())
    }

    /// Copy of the current config of instance `key`, if it has type `C`.
    pub async fn config<C: PluginConfig>(&self, key: &str) -> Option<C> {
        let entry = self.get(key).await?;
        let config = entry.config();
        config.as_any().downcast_ref::<C>().cloned()
    }
}
