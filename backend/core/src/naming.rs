//! Naming rules for plugin types and plugin instances.
//!
//! The plugin-type name is derived from a config type name by lowercasing it
//! and stripping well-known suffixes. Instance names are the lowercased
//! dotted field path at which a plugin config was found. Nothing else in
//! conflux invents names.

/// Suffixes removed from a type name, longest first so that
/// `configuration` wins over `config`.
const TYPE_SUFFIXES: &[&str] = &["configuration", "service", "plugin", "config", "impl", "cfg"];

/// Last path segment of a Rust type name, with generic arguments removed.
///
/// `my_app::plugins::KafkaConfig` becomes `KafkaConfig`.
pub fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Short name of `T` as reported by [`std::any::type_name`].
pub fn type_name_of<T: ?Sized>() -> &'static str {
    short_type_name(std::any::type_name::<T>())
}

/// Derive a plugin-type name from a type name.
///
/// Suffixes are stripped repeatedly (`KafkaPluginConfig` -> `kafka`) but a
/// name is never reduced to nothing: `Config` stays `config`.
pub fn derive_plugin_type(type_name: &str) -> String {
    let mut name = short_type_name(type_name).to_ascii_lowercase();
    loop {
        let stripped = TYPE_SUFFIXES.iter().find_map(|suffix| {
            name.strip_suffix(suffix)
                .filter(|rest| !rest.is_empty())
                .map(str::to_string)
        });
        match stripped {
            Some(rest) => name = rest,
            None => return name,
        }
    }
}

/// Lowercased instance name for a dotted field path.
pub fn instance_name(path: &str) -> String {
    path.to_lowercase()
}

/// Registry key of a plugin instance: `type` or `type:instance`.
pub fn instance_key(plugin_type: &str, instance: &str) -> String {
    if instance.is_empty() {
        plugin_type.to_string()
    } else {
        format!("{plugin_type}:{}", instance_name(instance))
    }
}

/// Append a field name to a dotted path.
pub fn join_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_suffixes() {
        assert_eq!(derive_plugin_type("KafkaConfig"), "kafka");
        assert_eq!(derive_plugin_type("BackupPlugin"), "backup");
        assert_eq!(derive_plugin_type("CacheService"), "cache");
        assert_eq!(derive_plugin_type("MetricsCfg"), "metrics");
        assert_eq!(derive_plugin_type("StoreImpl"), "store");
        assert_eq!(derive_plugin_type("AuditConfiguration"), "audit");
    }

    #[test]
    fn strips_stacked_suffixes_but_never_empties() {
        assert_eq!(derive_plugin_type("KafkaPluginConfig"), "kafka");
        assert_eq!(derive_plugin_type("Config"), "config");
        assert_eq!(derive_plugin_type("PluginConfig"), "plugin");
    }

    #[test]
    fn uses_last_path_segment() {
        assert_eq!(derive_plugin_type("my_app::plugins::KafkaConfig"), "kafka");
        assert_eq!(short_type_name("alloc::boxed::Box<app::KafkaConfig>"), "Box");
    }

    #[test]
    fn builds_instance_keys() {
        assert_eq!(instance_key("kafka", "KafkaProducer"), "kafka:kafkaproducer");
        assert_eq!(instance_key("kafka", "pipeline.Source"), "kafka:pipeline.source");
        assert_eq!(instance_key("kafka", ""), "kafka");
    }

    #[test]
    fn joins_paths() {
        assert_eq!(join_path("", "server"), "server");
        assert_eq!(join_path("server", "tls"), "server.tls");
    }
}
