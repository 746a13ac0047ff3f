//! Fluent construction of a [`Manager`].

use std::any::Any;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::ArgMatches;
use tracing::{debug, warn};

use conflux_core::{ConfigError, Context, Result};
use conflux_plugins::{collect_slots, Plugin, PluginManager};

use crate::cli::CliFlagsProvider;
use crate::env::EnvProvider;
use crate::manager::{Manager, ManagerOptions};
use crate::pipeline::AppConfig;
use crate::provider::{provider_config, Provider, ProviderConfig, Source};

/// A plugin handed to [`Builder::add_plugin`], registered once the manager
/// exists.
#[async_trait]
trait PendingPlugin: Send {
    async fn register(self: Box<Self>, plugins: &PluginManager) -> Result<String>;
}

struct Pending<P: Plugin> {
    name: String,
    plugin: P,
    config: P::Config,
}

#[async_trait]
impl<P: Plugin> PendingPlugin for Pending<P> {
    async fn register(self: Box<Self>, plugins: &PluginManager) -> Result<String> {
        let Pending { name, plugin, config } = *self;
        plugins.add(&name, plugin, config).await
    }
}

/// Accumulates sources, plugins and flags, then builds a [`Manager`].
///
/// Sources are listed lowest precedence first: a later source overrides the
/// keys it shares with an earlier one.
///
/// ```ignore
/// let manager = Builder::<AppConfig>::new()
///     .add_file("config.yaml")
///     .add_env("APP_")
///     .with_plugin()
///     .with_watch()
///     .build(&Context::background())
///     .await?;
/// ```
pub struct Builder<T: AppConfig> {
    sources: Vec<Source>,
    plugins: Vec<Box<dyn PendingPlugin>>,
    options: ManagerOptions,
    _config: PhantomData<fn() -> T>,
}

impl<T: AppConfig> Default for Builder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AppConfig> Builder<T> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            plugins: Vec::new(),
            options: ManagerOptions::default(),
            _config: PhantomData,
        }
    }

    pub fn add_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(Source::Path(path.into()));
        self
    }

    /// Environment variables starting with `prefix`; `APP_SERVER_PORT`
    /// becomes `server.port`.
    pub fn add_env(self, prefix: impl Into<String>) -> Self {
        let provider: Arc<dyn Provider> = Arc::new(EnvProvider::new(prefix));
        self.add_source(provider)
    }

    pub fn add_env_with_transform(
        self,
        prefix: impl Into<String>,
        delimiter: impl Into<String>,
        transform: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        let provider: Arc<dyn Provider> =
            Arc::new(EnvProvider::with_transform(prefix, delimiter, transform));
        self.add_source(provider)
    }

    /// Add an untyped source: a path (`String`, `&'static str`, `PathBuf`),
    /// an `Arc<dyn Provider>`, a `Box<dyn Provider>` or a
    /// [`CliFlagsProvider`]. Anything else fails at build time.
    pub fn add_provider(self, raw: impl Any + Send + Sync) -> Self {
        self.add_source(Source::Raw(Box::new(raw)))
    }

    pub fn add_source(mut self, source: impl Into<Source>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Flags explicitly given on the command line; flag ids are split on
    /// `delimiter` into nested keys.
    pub fn add_cli_flags(self, matches: ArgMatches, delimiter: impl Into<String>) -> Self {
        self.add_source(CliFlagsProvider::new(matches, delimiter))
    }

    /// Register an explicitly constructed plugin instance at build time.
    pub fn add_plugin<P: Plugin>(mut self, name: impl Into<String>, plugin: P, config: P::Config) -> Self {
        self.plugins.push(Box::new(Pending {
            name: name.into(),
            plugin,
            config,
        }));
        self
    }

    pub fn with_watch(mut self) -> Self {
        self.options.watch = true;
        self
    }

    /// Discover plugin instances in the first snapshot.
    pub fn with_plugin(mut self) -> Self {
        self.options.plugins = true;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.options.debounce = debounce;
        self
    }

    /// Replace `${VAR}` references in merged values from the environment.
    pub fn with_env_substitution(mut self) -> Self {
        self.options.substitute_env = true;
        self
    }

    /// Compose the first snapshot and bring up plugins and watchers as
    /// requested. On failure everything acquired so far is released.
    pub async fn build(self, ctx: &Context) -> Result<Manager<T>> {
        ctx.check("builder")?;
        if self.sources.is_empty() {
            return Err(ConfigError::unsupported_source(
                "no configuration sources added to the builder",
            ));
        }

        if self.options.plugins {
            // Pointer-typed plugin fields are rejected from the type alone,
            // before any source is opened.
            collect_slots(&T::default()).map_err(|e| e.context("plugin discovery failed"))?;
        }

        let mut providers: Vec<ProviderConfig> = Vec::with_capacity(self.sources.len());
        for source in self.sources {
            let description = format!("{source:?}");
            match provider_config(source) {
                Ok(pc) => providers.push(pc),
                Err(err) => {
                    close_providers(&providers);
                    return Err(err.context(format!("cannot use source {description}")));
                }
            }
        }
        debug!(providers = providers.len(), "Assembled provider configs");

        let manager = match Manager::<T>::load(providers.clone(), self.options.clone()).await {
            Ok(manager) => manager,
            Err(err) => {
                close_providers(&providers);
                return Err(err.context("cannot load initial config"));
            }
        };

        if let Err(err) = bring_up(&manager, self.plugins, &self.options).await {
            if let Err(close_err) = manager.close(ctx).await {
                warn!(error = %close_err, "Cleanup after failed build reported an error");
            }
            return Err(err);
        }
        Ok(manager)
    }

    /// [`build`](Self::build) that panics on error.
    pub async fn must_build(self, ctx: &Context) -> Manager<T> {
        match self.build(ctx).await {
            Ok(manager) => manager,
            Err(e) => panic!("conflux: failed to build config manager: {e}"),
        }
    }
}

async fn bring_up<T: AppConfig>(
    manager: &Manager<T>,
    plugins: Vec<Box<dyn PendingPlugin>>,
    options: &ManagerOptions,
) -> Result<()> {
    for pending in plugins {
        pending
            .register(manager.plugins())
            .await
            .map_err(|e| e.context("cannot register plugin"))?;
    }
    if options.plugins {
        manager
            .enable_plugins()
            .await
            .map_err(|e| e.context("plugin discovery failed"))?;
    }
    if options.watch {
        manager
            .enable_watch()
            .map_err(|e| e.context("cannot enable watching"))?;
    }
    Ok(())
}

fn close_providers(providers: &[ProviderConfig]) {
    for pc in providers {
        if let Err(err) = pc.provider.close() {
            warn!(provider = %pc.provider.name(), error = %err, "Provider close failed");
        }
    }
}
