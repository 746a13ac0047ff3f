//! The config manager: owns the published snapshot, the providers, the watch
//! tasks and the plugin instances.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use conflux_core::{ConfigError, Context, Result};
use conflux_plugins::PluginManager;

use crate::pipeline::{compose, AppConfig, ComposeOptions};
use crate::provider::{Provider, ProviderConfig, WatchCallback};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Events arriving within this window after the first one are folded
    /// into a single reload.
    pub debounce: Duration,
    pub watch: bool,
    pub plugins: bool,
    pub substitute_env: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            watch: false,
            plugins: false,
            substitute_env: false,
        }
    }
}

impl ManagerOptions {
    fn compose_options(&self) -> ComposeOptions {
        ComposeOptions {
            substitute_env: self.substitute_env,
        }
    }
}

type ChangeCallback<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

struct Shared<T> {
    snapshot: ArcSwap<T>,
    /// Guards the provider list and serialises composition.
    providers: RwLock<Vec<ProviderConfig>>,
    /// Held from publish until plugins are reconciled, so notifications and
    /// reconciliation follow publish order.
    reconcile: tokio::sync::Mutex<()>,
    /// Providers that can report changes, fixed at construction.
    watchable: Vec<Arc<dyn Provider>>,
    plugins: PluginManager,
    callbacks: parking_lot::RwLock<Vec<ChangeCallback<T>>>,
    plugins_enabled: AtomicBool,
    options: ManagerOptions,
}

impl<T: AppConfig> Shared<T> {
    /// One reload cycle: recompose from every provider, publish, notify,
    /// reconcile plugins. A failed composition leaves the snapshot alone.
    async fn reload(&self, ctx: &Context, trigger: &str) -> Result<()> {
        ctx.check(trigger)?;
        let (old, new, _reconcile) = {
            let providers = self.providers.write().await;
            let config = match compose::<T>(&providers, self.options.compose_options()).await {
                Ok(config) => Arc::new(config),
                Err(err) => {
                    warn!(trigger = %trigger, error = %err, "Config reload rejected; keeping current snapshot");
                    return Err(err);
                }
            };
            let reconcile = self.reconcile.lock().await;
            let old = self.snapshot.swap(config.clone());
            (old, config, reconcile)
        };
        info!(trigger = %trigger, "Published new config snapshot");

        let callbacks = self.callbacks.read().clone();
        for callback in callbacks {
            callback(old.as_ref(), new.as_ref());
        }

        self.plugins.reload(ctx, old.as_ref(), new.as_ref()).await
    }
}

struct WatchState {
    tasks: Vec<JoinHandle<()>>,
}

/// Holds the current config snapshot and keeps it up to date.
///
/// `get` is lock-free. Reloads, whether from a watched provider or
/// [`reload`](Self::reload), are serialised on the provider lock, so a
/// reader sees either the snapshot before a cycle or the one after it.
/// Change callbacks and plugin reconciliation run in publish order.
pub struct Manager<T: AppConfig> {
    shared: Arc<Shared<T>>,
    watch: Mutex<Option<WatchState>>,
    closed: AtomicBool,
}

impl<T: AppConfig> Manager<T> {
    /// Compose the first snapshot from `providers`.
    pub async fn load(providers: Vec<ProviderConfig>, options: ManagerOptions) -> Result<Self> {
        let config = compose::<T>(&providers, options.compose_options()).await?;
        info!(providers = providers.len(), "Loaded initial config snapshot");
        let watchable = providers
            .iter()
            .filter(|pc| pc.watchable().is_some())
            .map(|pc| pc.provider.clone())
            .collect();
        Ok(Self {
            shared: Arc::new(Shared {
                snapshot: ArcSwap::from_pointee(config),
                providers: RwLock::new(providers),
                reconcile: tokio::sync::Mutex::new(()),
                watchable,
                plugins: PluginManager::new(),
                callbacks: parking_lot::RwLock::new(Vec::new()),
                plugins_enabled: AtomicBool::new(false),
                options,
            }),
            watch: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// The current snapshot.
    pub fn get(&self) -> Arc<T> {
        self.shared.snapshot.load_full()
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.shared.options
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.shared.plugins
    }

    /// Register a callback run after every published reload with the old
    /// and new snapshots, before plugins are reconciled.
    pub fn on_change(&self, callback: impl Fn(&T, &T) + Send + Sync + 'static) {
        self.shared.callbacks.write().push(Arc::new(callback));
    }

    /// Recompose now, as if a watched provider had changed.
    pub async fn reload(&self, ctx: &Context) -> Result<()> {
        self.shared.reload(ctx, "manual").await
    }

    pub fn is_watching(&self) -> bool {
        self.watch.lock().is_some()
    }

    /// Start watching every provider that supports it. Calling it again
    /// while watching does nothing. Must run inside a tokio runtime.
    pub fn enable_watch(&self) -> Result<()> {
        let mut guard = self.watch.lock();
        if guard.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ConfigError::watch("manager", "watching requires a tokio runtime").with_cause(e)
        })?;

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for (armed, provider) in self.shared.watchable.iter().enumerate() {
            let Some(watchable) = provider.as_watchable() else {
                continue;
            };
            let name = provider.name();
            let (tx, rx) = mpsc::unbounded_channel();
            let callback: WatchCallback = Arc::new(move |event| {
                let _ = tx.send(event);
            });
            if let Err(err) = watchable.watch(callback) {
                for task in &tasks {
                    task.abort();
                }
                let _ = unwatch_all(&self.shared.watchable[..armed]);
                return Err(err.context(format!("cannot watch provider '{name}'")));
            }
            tasks.push(runtime.spawn(watch_loop(self.shared.clone(), name, rx)));
        }

        info!(watchers = tasks.len(), "Config watching enabled");
        *guard = Some(WatchState { tasks });
        Ok(())
    }

    /// Stop all watchers. Watching can be enabled again afterwards.
    pub fn disable_watch(&self) -> Result<()> {
        let Some(state) = self.watch.lock().take() else {
            return Ok(());
        };
        for task in &state.tasks {
            task.abort();
        }

        let result = unwatch_all(&self.shared.watchable);
        info!("Config watching disabled");
        result
    }

    /// Discover plugin instances in the current snapshot. Runs once; later
    /// calls return the already registered keys.
    pub async fn enable_plugins(&self) -> Result<Vec<String>> {
        if self.shared.plugins_enabled.swap(true, Ordering::SeqCst) {
            return Ok(self.shared.plugins.keys().await);
        }
        let _providers = self.shared.providers.read().await;
        let snapshot = self.get();
        match self.shared.plugins.discover_and_register(snapshot.as_ref()).await {
            Ok(keys) => {
                info!(instances = keys.len(), "Plugin discovery finished");
                Ok(keys)
            }
            Err(err) => {
                self.shared.plugins_enabled.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    pub async fn start_plugins(&self, ctx: &Context) -> Result<()> {
        self.shared.plugins.startup(ctx).await
    }

    pub async fn stop_plugins(&self, ctx: &Context) -> Result<()> {
        self.shared.plugins.shutdown(ctx).await
    }

    /// Stop watching, stop plugins and release provider resources. Every
    /// step is attempted; the first error is returned.
    pub async fn close(&self, ctx: &Context) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut first_err = self.disable_watch().err();
        if let Err(err) = self.stop_plugins(ctx).await {
            first_err.get_or_insert(err);
        }
        for pc in self.shared.providers.read().await.iter() {
            if let Err(err) = pc.provider.close() {
                first_err.get_or_insert(err);
            }
        }
        info!("Config manager closed");
        first_err.map_or(Ok(()), Err)
    }
}

impl<T: AppConfig> Drop for Manager<T> {
    fn drop(&mut self) {
        if let Some(state) = self.watch.get_mut().take() {
            for task in state.tasks {
                task.abort();
            }
            let _ = unwatch_all(&self.shared.watchable);
        }
    }
}

/// Unwatch every provider, returning the first error.
fn unwatch_all(providers: &[Arc<dyn Provider>]) -> Result<()> {
    let mut first_err = None;
    for provider in providers {
        if let Some(w) = provider.as_watchable() {
            if let Err(err) = w.unwatch() {
                first_err.get_or_insert(err);
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}

async fn watch_loop<T: AppConfig>(
    shared: Arc<Shared<T>>,
    provider: String,
    mut events: mpsc::UnboundedReceiver<Result<()>>,
) {
    while let Some(event) = events.recv().await {
        if let Err(err) = event {
            error!(provider = %provider, error = %err, "Watcher reported an error");
            continue;
        }

        let window = tokio::time::sleep(shared.options.debounce);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                more = events.recv() => match more {
                    Some(Ok(())) => {}
                    Some(Err(err)) => {
                        error!(provider = %provider, error = %err, "Watcher reported an error");
                    }
                    None => return,
                },
            }
        }

        debug!(provider = %provider, "Provider changed; reloading");
        if let Err(err) = shared.reload(&Context::background(), &provider).await {
            warn!(provider = %provider, error = %err, "Reload after change failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::Defaults;
    use crate::memory::MemoryProvider;
    use crate::provider::{provider_config, Provider, Source};
    use crate::validation::{FieldValidator, Validate, ValidateFields};
    use conflux_core::ErrorKind;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct App {
        value: u32,
        label: String,
    }

    impl Defaults for App {
        fn apply_defaults(&mut self, _d: &mut crate::defaults::DefaultsWalker) -> Result<()> {
            Ok(())
        }
    }

    impl ValidateFields for App {
        fn validate_fields(&self, v: &mut FieldValidator) {
            v.check("value", &self.value).max(1000);
        }
    }

    impl Validate for App {}

    impl conflux_plugins::Visit for App {
        fn visit(&self, _v: &mut conflux_plugins::Visitor) -> Result<()> {
            Ok(())
        }
    }

    async fn manager(mem: &Arc<MemoryProvider>, debounce: Duration) -> Manager<App> {
        let provider: Arc<dyn Provider> = mem.clone();
        let pc = provider_config(Source::Provider(provider)).unwrap();
        let options = ManagerOptions {
            debounce,
            ..Default::default()
        };
        Manager::load(vec![pc], options).await.unwrap()
    }

    fn mem(value: u32) -> Arc<MemoryProvider> {
        let data = json!({"value": value, "label": "a"});
        Arc::new(MemoryProvider::new("test").with_data(data.as_object().cloned().unwrap()))
    }

    #[tokio::test]
    async fn manual_reload_publishes_and_notifies() {
        let mem = mem(1);
        let mgr = manager(&mem, DEFAULT_DEBOUNCE).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        mgr.on_change(move |old, new| log.lock().push((old.value, new.value)));

        let before = mgr.get();
        mem.set("value", json!(2));
        mgr.reload(&Context::background()).await.unwrap();
        assert_eq!(before.value, 1, "old snapshot is never mutated");
        assert_eq!(mgr.get().value, 2);
        assert_eq!(*seen.lock(), vec![(1, 2)]);
    }

    #[tokio::test]
    async fn invalid_reload_keeps_snapshot() {
        let mem = mem(1);
        let mgr = manager(&mem, DEFAULT_DEBOUNCE).await;
        mem.set("value", json!(5000));
        let err = mgr.reload(&Context::background()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailure);
        assert_eq!(mgr.get().value, 1);
    }

    #[tokio::test]
    async fn watch_coalesces_bursts_into_one_reload() {
        let mem = mem(1);
        let mgr = manager(&mem, Duration::from_millis(100)).await;
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = reloads.clone();
        mgr.on_change(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        mgr.enable_watch().unwrap();
        mem.set("value", json!(7));
        mem.set("label", json!("b"));
        mem.set("value", json!(8));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.get().value, 8);
        assert_eq!(mgr.get().label, "b");
    }

    #[tokio::test]
    async fn watch_toggles_are_idempotent() {
        let mem = mem(1);
        let mgr = manager(&mem, Duration::from_millis(10)).await;
        for _ in 0..3 {
            mgr.enable_watch().unwrap();
        }
        assert!(mgr.is_watching());
        assert!(mem.as_watchable().unwrap().is_watching());
        for _ in 0..3 {
            mgr.disable_watch().unwrap();
        }
        assert!(!mgr.is_watching());
        assert!(!mem.as_watchable().unwrap().is_watching());

        mgr.enable_watch().unwrap();
        mem.set("value", json!(3));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(mgr.get().value, 3);
        mgr.close(&Context::background()).await.unwrap();
        assert!(!mgr.is_watching());
    }

    /// Hands out a fresh `value` on every read.
    struct Counting {
        reads: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl Provider for Counting {
        fn name(&self) -> String {
            "counting".into()
        }

        fn kind(&self) -> crate::provider::ProviderKind {
            crate::provider::ProviderKind::Structured
        }

        async fn read(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"value": n, "label": "a"}).as_object().cloned().unwrap_or_default())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reloads_notify_in_publish_order() {
        let provider: Arc<dyn Provider> = Arc::new(Counting {
            reads: std::sync::atomic::AtomicU32::new(0),
        });
        let pc = provider_config(Source::Provider(provider)).unwrap();
        let mgr = Arc::new(Manager::<App>::load(vec![pc], ManagerOptions::default()).await.unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        mgr.on_change(move |old, new| {
            std::thread::yield_now();
            log.lock().push((old.value, new.value));
        });

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let mgr = mgr.clone();
            tasks.push(tokio::spawn(async move { mgr.reload(&Context::background()).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 32);
        let mut previous = 0;
        for (old, new) in seen {
            assert_eq!(old, previous, "callback saw snapshots out of publish order");
            assert_eq!(new, old + 1);
            previous = new;
        }
        assert_eq!(mgr.get().value, 32);
    }

    #[tokio::test]
    async fn canceled_context_skips_reload() {
        let mem = mem(1);
        let mgr = manager(&mem, DEFAULT_DEBOUNCE).await;
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        mem.set("value", json!(9));
        let err = mgr.reload(&ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Canceled);
        assert_eq!(mgr.get().value, 1);
    }
}
