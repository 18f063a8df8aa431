//! Composition root
//!
//! `ModuleHost` owns the flag store, observer bus, module manager and the
//! flag file watcher for one process. Everything is built in `init` and
//! torn down in `shutdown`; nothing is reachable through globals.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::HostConfig;
use crate::flags::{
    reconcile_loop, ConfigWatcher, FeatureFlagStore, FlagBackend, JsonFileBackend, ObserverBus,
};
use crate::module::api::collaborators::{
    CommandDispatcher, CommandTable, InMemoryStorage, StorageBackend,
};
use crate::module::{Module, ModuleManager};

/// Builder for `ModuleHost`
pub struct ModuleHostBuilder {
    config: HostConfig,
    modules: Vec<Arc<dyn Module>>,
    storage: Option<Arc<dyn StorageBackend>>,
    dispatcher: Option<Arc<dyn CommandDispatcher>>,
    flag_backend: Option<Arc<dyn FlagBackend>>,
    watch: Option<bool>,
    auto_start: Option<bool>,
}

impl ModuleHostBuilder {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            modules: Vec::new(),
            storage: None,
            dispatcher: None,
            flag_backend: None,
            watch: None,
            auto_start: None,
        }
    }

    pub fn with_module<M: Module + 'static>(mut self, module: M) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    /// Register modules in the given order
    pub fn with_modules(mut self, modules: Vec<Arc<dyn Module>>) -> Self {
        self.modules.extend(modules);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replace the JSON flag file (e.g. with `MemoryFlagBackend`)
    pub fn with_flag_backend(mut self, backend: Arc<dyn FlagBackend>) -> Self {
        self.flag_backend = Some(backend);
        self
    }

    /// Override `flags.watch` from the config
    pub fn with_watcher(mut self, watch: bool) -> Self {
        self.watch = Some(watch);
        self
    }

    /// Override `lifecycle.auto_start_on_init` from the config
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = Some(auto_start);
        self
    }

    /// Build the host: load flags, register modules, start watching and
    /// auto-start modules as configured
    pub async fn init(self) -> anyhow::Result<ModuleHost> {
        let config = self.config;
        config.validate()?;

        let backend: Arc<dyn FlagBackend> = match self.flag_backend {
            Some(backend) => backend,
            None => Arc::new(JsonFileBackend::new(config.flags_path())),
        };
        let bus = Arc::new(ObserverBus::new());
        let flags = Arc::new(
            FeatureFlagStore::open(backend, bus, config.persist_retry())
                .context("failed to load feature flags")?,
        );

        let storage: Arc<dyn StorageBackend> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(InMemoryStorage::new()),
        };
        let dispatcher: Arc<dyn CommandDispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(CommandTable::new()),
        };

        let manager = ModuleManager::new(Arc::clone(&flags), config.lifecycle.clone())
            .with_storage(storage)
            .with_dispatcher(dispatcher)
            .with_overrides(config.modules.clone())
            .with_module_configs(config.module_configs.clone())
            .with_state_file(config.registry_path())
            .context("failed to load registry state")?;
        let manager = Arc::new(manager);

        for module in self.modules {
            let name = module.name().to_string();
            manager
                .register(module)
                .await
                .with_context(|| format!("failed to register module {}", name))?;
        }

        let mut host = ModuleHost {
            config,
            flags,
            manager,
            watcher: None,
            reconcile: None,
        };

        if self.watch.unwrap_or(host.config.flags.watch) {
            host.start_watcher()?;
        }

        if self.auto_start.unwrap_or(host.config.lifecycle.auto_start_on_init) {
            let failures = host.manager.start_auto_start_modules().await;
            if !failures.is_empty() {
                warn!("{} modules failed to auto-start", failures.len());
            }
        }

        info!("Host initialized");
        Ok(host)
    }
}

/// A running host
pub struct ModuleHost {
    config: HostConfig,
    flags: Arc<FeatureFlagStore>,
    manager: Arc<ModuleManager>,
    watcher: Option<ConfigWatcher>,
    reconcile: Option<JoinHandle<()>>,
}

impl ModuleHost {
    pub fn builder(config: HostConfig) -> ModuleHostBuilder {
        ModuleHostBuilder::new(config)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn flags(&self) -> &Arc<FeatureFlagStore> {
        &self.flags
    }

    pub fn manager(&self) -> &Arc<ModuleManager> {
        &self.manager
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    fn start_watcher(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.flags.backend_path().map(|p| p.to_path_buf()) else {
            info!("Flag backend is not file based, not watching");
            return Ok(());
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = ConfigWatcher::spawn(&path, self.config.flags.debounce(), tx)
            .with_context(|| format!("failed to watch {}", path.display()))?;
        self.reconcile = Some(tokio::spawn(reconcile_loop(Arc::clone(&self.flags), rx)));
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stop all modules, then the watcher, then drain reconciliation
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        info!("Shutting down host");

        let failures = self.manager.stop_all().await;
        for (name, e) in &failures {
            error!("Module {} did not stop cleanly: {}", name, e);
        }

        if let Some(mut watcher) = self.watcher.take() {
            tokio::task::spawn_blocking(move || watcher.shutdown())
                .await
                .context("flag watcher shutdown failed")?;
        }
        // Watcher thread gone, so the signal channel is closed
        if let Some(reconcile) = self.reconcile.take() {
            if let Err(e) = reconcile.await {
                error!("Flag reconcile task failed: {}", e);
            }
        }

        info!("Host shut down");
        Ok(())
    }
}
