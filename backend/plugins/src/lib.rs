//! `conflux-plugins` — plugins whose configuration lives inside the
//! application config.
//!
//! Provides:
//! - The [`Plugin`] contract and the [`BaseConfig`] marker for plugin configs
//! - [`Visit`] / [`ConfigNode`], the walk used to find plugin configs
//! - A process-wide plugin type registry
//! - [`PluginManager`]: discovery, startup, shutdown and differential reload

pub mod config;
pub mod lifecycle;
pub mod manager;
pub mod plugin;
pub mod registry;
pub mod tree;

pub use config::{plugin_type_of, BaseConfig, ErasedConfig, PluginConfig};
pub use lifecycle::PluginState;
pub use manager::{InstanceEntry, PluginManager};
pub use plugin::{DynPlugin, Plugin};
pub use registry::{
    list_plugin_types, lookup_plugin_type, plugin_types, register_plugin_type,
    unregister_plugin_type, PluginTypeEntry, RegisterOptions,
};
pub use tree::{collect_slots, ConfigNode, Shape, Slot, Visit, Visitor};
