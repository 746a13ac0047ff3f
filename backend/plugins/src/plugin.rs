//! The plugin contract and its type-erased adapter.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use conflux_core::naming;
use conflux_core::Context;

use crate::config::{ErasedConfig, PluginConfig};

/// A plugin whose configuration is embedded in the application config.
///
/// `reload` is called while the plugin manager holds its read lock, so it
/// must not call back into the plugin manager.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    type Config: PluginConfig;

    async fn startup(&self, ctx: &Context, config: &Self::Config) -> Result<()>;

    async fn reload(&self, ctx: &Context, config: &Self::Config) -> Result<()>;

    async fn shutdown(&self, ctx: &Context) -> Result<()>;
}

/// Object-safe form of [`Plugin`] stored by the plugin manager.
#[async_trait]
pub trait DynPlugin: Send + Sync {
    async fn startup(&self, ctx: &Context, config: &dyn ErasedConfig) -> Result<()>;

    async fn reload(&self, ctx: &Context, config: &dyn ErasedConfig) -> Result<()>;

    async fn shutdown(&self, ctx: &Context) -> Result<()>;

    /// Short type name of the config this plugin expects.
    fn config_type(&self) -> &'static str;
}

/// Wraps a typed plugin so it can be stored as `Arc<dyn DynPlugin>`.
pub struct Erased<P>(pub P);

fn downcast<'a, C: PluginConfig>(config: &'a dyn ErasedConfig) -> Result<&'a C> {
    config.as_any().downcast_ref::<C>().ok_or_else(|| {
        anyhow!(
            "expected config of type {}, got {}",
            naming::type_name_of::<C>(),
            config.type_name()
        )
    })
}

#[async_trait]
impl<P: Plugin> DynPlugin for Erased<P> {
    async fn startup(&self, ctx: &Context, config: &dyn ErasedConfig) -> Result<()> {
        let config = downcast::<P::Config>(config)?;
        self.0.startup(ctx, config).await
    }

    async fn reload(&self, ctx: &Context, config: &dyn ErasedConfig) -> Result<()> {
        let config = downcast::<P::Config>(config)?;
        self.0.reload(ctx, config).await
    }

    async fn shutdown(&self, ctx: &Context) -> Result<()> {
        self.0.shutdown(ctx).await
    }

    fn config_type(&self) -> &'static str {
        naming::type_name_of::<P::Config>()
    }
}
