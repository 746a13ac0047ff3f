//! Per-instance startup, reload and shutdown sequences.
//!
//! Each sequence checks the cancelation context, runs the plugin callback
//! under it, updates the instance state and wraps failures into
//! `PluginFailure` errors keyed by the instance key.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use conflux_core::{ConfigError, Context, ErrorKind, Result};

use crate::config::ErasedConfig;
use crate::manager::InstanceEntry;

/// Current state of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Discovered or added, not started yet.
    Registered,
    Active,
    /// Startup failed; may be retried by the next startup call.
    Failed,
    Stopped,
}

fn wrap(key: &str, action: &str, err: anyhow::Error) -> ConfigError {
    ConfigError::plugin(key, format!("{action} failed for plugin '{key}': {err}")).with_anyhow(err)
}

fn canceled(key: &str, action: &str, err: ConfigError) -> ConfigError {
    if err.is(ErrorKind::Canceled) {
        err.context(format!("{action} of plugin '{key}'"))
    } else {
        err
    }
}

pub(crate) async fn run_startup(entry: &InstanceEntry, ctx: &Context) -> Result<()> {
    debug!(plugin = %entry.key, "Running startup sequence");
    let config = entry.config();
    let outcome = ctx
        .run(&entry.key, entry.plugin.startup(ctx, config.as_ref()))
        .await
        .map_err(|e| canceled(&entry.key, "startup", e))?;

    match outcome {
        Ok(()) => {
            entry.set_state(PluginState::Active);
            info!(plugin = %entry.key, plugin_type = %entry.plugin_type, "Plugin started");
            Ok(())
        }
        Err(err) => {
            entry.set_state(PluginState::Failed);
            warn!(plugin = %entry.key, error = %err, "Plugin startup failed");
            Err(wrap(&entry.key, "startup", err))
        }
    }
}

/// Hand `config` to a running plugin and, on success, make it the stored
/// config.
pub(crate) async fn run_reload(
    entry: &InstanceEntry,
    ctx: &Context,
    config: Arc<dyn ErasedConfig>,
) -> Result<()> {
    debug!(plugin = %entry.key, "Running reload sequence");
    let outcome = ctx
        .run(&entry.key, entry.plugin.reload(ctx, config.as_ref()))
        .await
        .map_err(|e| canceled(&entry.key, "reload", e))?;

    match outcome {
        Ok(()) => {
            entry.replace_config(config);
            info!(plugin = %entry.key, "Plugin reloaded");
            Ok(())
        }
        Err(err) => {
            warn!(plugin = %entry.key, error = %err, "Plugin reload failed; keeping previous config");
            Err(wrap(&entry.key, "reload", err))
        }
    }
}

/// Stop a plugin. The instance counts as stopped afterwards even when the
/// callback fails.
pub(crate) async fn run_shutdown(entry: &InstanceEntry, ctx: &Context) -> Result<()> {
    debug!(plugin = %entry.key, "Running shutdown sequence");
    let outcome = ctx.run(&entry.key, entry.plugin.shutdown(ctx)).await;
    entry.set_state(PluginState::Stopped);

    match outcome {
        Ok(Ok(())) => {
            info!(plugin = %entry.key, "Plugin stopped");
            Ok(())
        }
        Ok(Err(err)) => {
            warn!(plugin = %entry.key, error = %err, "Plugin shutdown failed");
            Err(wrap(&entry.key, "shutdown", err))
        }
        Err(err) => Err(canceled(&entry.key, "shutdown", err)),
    }
}
