//! `conflux-config` — typed configuration composition and hot reload.
//!
//! Provides:
//! - Providers for files, environment variables, CLI flags and in-memory data
//! - Deep merge of providers in precedence order, `${ENV_VAR}` substitution
//! - Literal defaults and field validation for the composed type
//! - A [`Manager`] publishing lock-free snapshots, reloading on change
//! - Plugin discovery and reconciliation through `conflux-plugins`
//! - Redaction of sensitive values for safe logging

pub mod builder;
pub mod cli;
pub mod decode;
pub mod defaults;
pub mod env;
pub mod file;
pub mod manager;
pub mod memory;
pub mod merge;
pub mod parser;
pub mod pipeline;
pub mod provider;
pub mod redact;
pub mod validation;

// Re-export most-used types at crate root.
pub use builder::Builder;
pub use cli::CliFlagsProvider;
pub use defaults::{apply_defaults, DefaultLiteral, Defaults, DefaultsWalker, IsZero};
pub use env::{
    collect_referenced_vars, contains_env_var_reference, resolve_env_vars, resolve_env_vars_with,
    EnvProvider, MissingEnvVarError,
};
pub use file::FileWatcher;
pub use manager::{Manager, ManagerOptions, DEFAULT_DEBOUNCE};
pub use memory::{BytesProvider, MemoryProvider};
pub use parser::{JsonParser, Parser, YamlParser};
pub use pipeline::{compose, load, must_load, AppConfig, ComposeOptions};
pub use provider::{
    provider_config, Provider, ProviderConfig, ProviderKind, Source, WatchCallback, Watchable,
};
pub use redact::{collect_redacted_paths, redact};
pub use validation::{
    validate_config, ConfigValidationError, FieldValidator, Validate, ValidateFields,
    ValidationReport,
};

pub use conflux_core::{ConfigError, Context, ErrorKind, Result};
pub use conflux_plugins::{
    config_node, plugin_config, list_plugin_types, register_plugin_type, unregister_plugin_type,
    BaseConfig, ConfigNode, Plugin, PluginManager, RegisterOptions, Visit, Visitor,
};
