//! Plugin configuration marker and its type-erased form.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use conflux_core::naming;

/// Marker embedded in every plugin config.
///
/// Embed it with `#[serde(flatten)] pub base: BaseConfig` in a field named
/// `base`. A non-empty `type` overrides the plugin-type name derived from the
/// config's type name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub plugin_type: String,
}

impl BaseConfig {
    pub fn of_type(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
        }
    }
}

/// A configuration value owned by one plugin instance.
///
/// Usually implemented through [`plugin_config!`](crate::plugin_config).
pub trait PluginConfig: Any + Clone + PartialEq + fmt::Debug + Default + Send + Sync {
    fn base(&self) -> &BaseConfig;
}

/// Object-safe view of a [`PluginConfig`], used wherever the concrete type
/// is not known statically.
pub trait ErasedConfig: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;

    fn clone_boxed(&self) -> Box<dyn ErasedConfig>;

    /// Deep equality; values of different concrete types are never equal.
    fn eq_erased(&self, other: &dyn ErasedConfig) -> bool;

    /// Overwrite `self` with `other`. Returns `false` when the concrete
    /// types differ.
    fn assign_from(&mut self, other: &dyn ErasedConfig) -> bool;

    fn base(&self) -> &BaseConfig;

    /// Short static type name, e.g. `KafkaConfig`.
    fn type_name(&self) -> &'static str;
}

impl<C: PluginConfig> ErasedConfig for C {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn ErasedConfig> {
        Box::new(self.clone())
    }

    fn eq_erased(&self, other: &dyn ErasedConfig) -> bool {
        other
            .as_any()
            .downcast_ref::<C>()
            .is_some_and(|other| self == other)
    }

    fn assign_from(&mut self, other: &dyn ErasedConfig) -> bool {
        match other.as_any().downcast_ref::<C>() {
            Some(other) => {
                self.clone_from(other);
                true
            }
            None => false,
        }
    }

    fn base(&self) -> &BaseConfig {
        PluginConfig::base(self)
    }

    fn type_name(&self) -> &'static str {
        naming::type_name_of::<C>()
    }
}

impl Clone for Box<dyn ErasedConfig> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Plugin-type name for a discovered config: the marker's `type` when set,
/// otherwise derived from the static type name.
pub fn plugin_type_of(config: &dyn ErasedConfig) -> String {
    let explicit = config.base().plugin_type.trim();
    if explicit.is_empty() {
        naming::derive_plugin_type(config.type_name())
    } else {
        explicit.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct CacheConfig {
        #[serde(flatten)]
        base: BaseConfig,
        size: u32,
    }
    crate::plugin_config!(CacheConfig);

    #[derive(Debug, Clone, Default, PartialEq)]
    struct OtherConfig {
        base: BaseConfig,
    }
    crate::plugin_config!(OtherConfig);

    #[test]
    fn erased_equality_respects_type_and_value() {
        let a = CacheConfig { size: 1, ..Default::default() };
        let b = CacheConfig { size: 1, ..Default::default() };
        let c = CacheConfig { size: 2, ..Default::default() };
        assert!(a.eq_erased(&b));
        assert!(!a.eq_erased(&c));
        assert!(!a.eq_erased(&OtherConfig::default()));
    }

    #[test]
    fn assign_copies_values_of_same_type_only() {
        let mut fresh = CacheConfig::default();
        let found = CacheConfig { size: 64, ..Default::default() };
        assert!(fresh.assign_from(&found));
        assert_eq!(fresh.size, 64);
        assert!(!fresh.assign_from(&OtherConfig::default()));
    }

    #[test]
    fn plugin_type_prefers_marker() {
        let derived = CacheConfig::default();
        assert_eq!(plugin_type_of(&derived), "cache");
        let explicit = CacheConfig {
            base: BaseConfig::of_type("redis"),
            size: 0,
        };
        assert_eq!(plugin_type_of(&explicit), "redis");
    }

    #[test]
    fn marker_reads_type_key() {
        let cfg: CacheConfig = serde_json::from_str(r#"{"type":"lru","size":8}"#).unwrap();
        assert_eq!(cfg.base.plugin_type, "lru");
        assert_eq!(cfg.size, 8);
    }
}
