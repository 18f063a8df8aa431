//! Module manager for orchestrating all modules
//!
//! Handles registration, dependency-ordered start/stop, and the per-module
//! state machine. Lifecycle operations lock every module they touch (in name
//! order) before the first transition, so operations on one module are
//! serialized and concurrent plans never deadlock. Registry locks are held
//! only for bookkeeping, never across a hook, so readers are never blocked
//! by an in-flight start or stop.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{LifecycleConfig, ModuleOverride};
use crate::flags::{FeatureFlagStore, FlagClient};
use crate::module::api::collaborators::{CommandDispatcher, ConnectionHandle, StorageBackend};
use crate::module::api::events::{ModuleEvent, ModuleEventHub, ModuleEventKind};
use crate::module::registry::{
    DependencyResolver, ModuleDefinition, ModuleRecord, ModuleRegistry, PersistedModuleState,
    RegistryStateFile,
};
use crate::module::traits::{Module, ModuleContext, ModuleError, ModuleState};
use crate::utils::{current_timestamp_millis, with_custom_timeout};

/// Read-only view of one module
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub state: ModuleState,
    pub enabled: bool,
    pub auto_start: bool,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub flag_count: usize,
    pub command_count: usize,
    pub has_schema: bool,
    pub last_error: Option<String>,
    pub started_at: Option<u64>,
    pub start_count: u64,
}

/// Summary across all modules
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostStatus {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub starting: usize,
    pub stopping: usize,
    pub error: usize,
    pub enabled: usize,
    pub auto_start: usize,
    pub flags: usize,
    pub flags_version: u64,
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    Start,
    Stop,
}

impl Hook {
    fn name(self) -> &'static str {
        match self {
            Hook::Start => "start",
            Hook::Stop => "stop",
        }
    }
}

/// Module manager coordinates all registered modules
pub struct ModuleManager {
    registry: RwLock<ModuleRegistry>,
    /// One lifecycle lock per module name
    op_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Serializes register/unregister
    registration_gate: Mutex<()>,
    /// Serializes state file merges within this process
    persist_gate: Mutex<()>,
    flags: Arc<FeatureFlagStore>,
    storage: Option<Arc<dyn StorageBackend>>,
    dispatcher: Option<Arc<dyn CommandDispatcher>>,
    events: Arc<ModuleEventHub>,
    state_file: Option<PathBuf>,
    persisted: RegistryStateFile,
    lifecycle: LifecycleConfig,
    overrides: HashMap<String, ModuleOverride>,
    module_configs: HashMap<String, HashMap<String, String>>,
}

impl ModuleManager {
    /// Create a new module manager
    pub fn new(flags: Arc<FeatureFlagStore>, lifecycle: LifecycleConfig) -> Self {
        Self {
            registry: RwLock::new(ModuleRegistry::new()),
            op_locks: StdMutex::new(HashMap::new()),
            registration_gate: Mutex::new(()),
            persist_gate: Mutex::new(()),
            flags,
            storage: None,
            dispatcher: None,
            events: Arc::new(ModuleEventHub::new()),
            state_file: None,
            persisted: RegistryStateFile::default(),
            lifecycle,
            overrides: HashMap::new(),
            module_configs: HashMap::new(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Persist registry state to `path`, restoring whatever is already there
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Result<Self, ModuleError> {
        let path = path.into();
        self.persisted = RegistryStateFile::load(&path)?;
        debug!(
            "Loaded registry state for {} modules from {:?}",
            self.persisted.modules.len(),
            path
        );
        self.state_file = Some(path);
        Ok(self)
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, ModuleOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_module_configs(mut self, configs: HashMap<String, HashMap<String, String>>) -> Self {
        self.module_configs = configs;
        self
    }

    pub fn flags(&self) -> &Arc<FeatureFlagStore> {
        &self.flags
    }

    /// Lifecycle event stream
    pub async fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ModuleEvent> {
        self.events.subscribe().await
    }

    /// Register a module
    ///
    /// Fails without any change on a duplicate name, a dependency cycle or a
    /// flag conflict. Schema and connection failures are logged only.
    pub async fn register(&self, module: Arc<dyn Module>) -> Result<(), ModuleError> {
        let definition = ModuleDefinition::from_module(module.as_ref());
        let name = definition.name.clone();

        let _gate = self.registration_gate.lock().await;
        self.registry.read().await.check_registrable(&definition)?;
        self.flags.register_flags(&name, &definition.flags).await?;

        let mut connection = None;
        if let Some(storage) = &self.storage {
            if let Some(schema) = &definition.schema {
                if let Err(e) = storage.apply_schema(&name, schema).await {
                    warn!("Schema for module {} not applied: {}", name, e);
                }
            }
            match storage.acquire_connection(&name).await {
                Ok(handle) => connection = Some(handle),
                Err(e) => warn!("No storage connection for module {}: {}", name, e),
            }
        }

        let mut record = self.initial_record(definition, module);
        record.connection = connection;
        info!(
            "Registered module {} v{} (enabled: {}, auto_start: {})",
            name, record.definition.version, record.enabled, record.auto_start
        );
        if let Err(e) = self.registry.write().await.register(record) {
            self.flags.retire_owner(&name).await;
            return Err(e);
        }

        self.events
            .publish(ModuleEvent::new(&name, ModuleEventKind::Registered, None))
            .await;
        self.persist_best_effort().await;
        Ok(())
    }

    /// Persisted state wins, then config overrides, then module defaults
    fn initial_record(&self, definition: ModuleDefinition, module: Arc<dyn Module>) -> ModuleRecord {
        let persisted = self.persisted.modules.get(&definition.name);
        let overrides = self.overrides.get(&definition.name);

        let enabled = persisted
            .map(|p| p.enabled)
            .or_else(|| overrides.and_then(|o| o.enabled))
            .unwrap_or(definition.defaults.enabled_by_default);
        let auto_start = persisted
            .map(|p| p.auto_start)
            .or_else(|| overrides.and_then(|o| o.auto_start))
            .unwrap_or(definition.defaults.auto_start);

        let mut record = ModuleRecord::new(definition, module, enabled, auto_start);
        if let Some(p) = persisted {
            // Hooks have not run in this process; runtime state restarts at INACTIVE
            record.last_error = p.last_error.clone();
            record.start_count = p.start_count;
        }
        record
    }

    /// Remove an INACTIVE module; its flags become undeclared
    pub async fn unregister(&self, name: &str) -> Result<(), ModuleError> {
        let _guards = self.lock_modules(&[name.to_string()]).await;
        let _gate = self.registration_gate.lock().await;

        self.registry.write().await.unregister(name)?;
        let retired = self.flags.retire_owner(name).await;
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.unregister_module(name);
        }

        info!("Unregistered module {} ({} flags retired)", name, retired);
        self.events
            .publish(ModuleEvent::new(name, ModuleEventKind::Unregistered, None))
            .await;
        Ok(())
    }

    /// Start a module and everything it depends on
    ///
    /// Already ACTIVE modules are skipped. The first failure aborts the rest
    /// of the plan; modules started earlier stay ACTIVE unless rollback is
    /// configured, in which case they are stopped in reverse order.
    pub async fn start(&self, name: &str) -> Result<(), ModuleError> {
        let mut plan = self.plan_start(name).await?;
        let _guards = loop {
            let guards = self.lock_modules(&plan).await;
            // Registry may have changed while waiting
            let current = self.plan_start(name).await?;
            if current == plan {
                break guards;
            }
            drop(guards);
            plan = current;
        };

        {
            let registry = self.registry.read().await;
            if registry.require(name)?.state == ModuleState::Active {
                debug!("Module {} already active", name);
                return Ok(());
            }
            for member in &plan {
                let record = registry.require(member)?;
                if record.state != ModuleState::Active && !record.enabled {
                    return Err(ModuleError::ModuleDisabled(member.clone()));
                }
            }
        }

        info!("Starting module {} (plan: {:?})", name, plan);
        let mut started: Vec<String> = Vec::new();
        for member in &plan {
            if self.state_of(member).await == Some(ModuleState::Active) {
                continue;
            }
            match self.run_start(member).await {
                Ok(()) => started.push(member.clone()),
                Err(e) => {
                    if self.lifecycle.rollback_on_failure && !started.is_empty() {
                        warn!(
                            "Start of {} failed at {}, rolling back {:?}",
                            name, member, started
                        );
                        for done in started.iter().rev() {
                            if let Err(stop_err) = self.run_stop(done).await {
                                error!("Rollback stop of {} failed: {}", done, stop_err);
                            }
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Stop a module
    ///
    /// Fails without state change while anything running depends on it.
    /// Stopping an INACTIVE module is a no-op.
    pub async fn stop(&self, name: &str) -> Result<(), ModuleError> {
        let _guards = self.lock_modules(&[name.to_string()]).await;
        {
            let registry = self.registry.read().await;
            let record = registry.require(name)?;
            match record.state {
                ModuleState::Inactive => {
                    debug!("Module {} already inactive", name);
                    return Ok(());
                }
                ModuleState::Active => {}
                state => {
                    return Err(ModuleError::InvalidState {
                        module: name.to_string(),
                        state,
                        operation: "stop".to_string(),
                    })
                }
            }
            DependencyResolver::plan_stop(&*registry, name)?;
        }
        self.run_stop(name).await
    }

    /// Stop then start, keeping the registered configuration
    ///
    /// A module that is not running (INACTIVE or ERROR) counts as already
    /// stopped. If the stop is refused, nothing is started.
    pub async fn restart(&self, name: &str) -> Result<(), ModuleError> {
        info!("Restarting module {}", name);
        let state = self
            .state_of(name)
            .await
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))?;
        match state {
            ModuleState::Inactive | ModuleState::Error => {
                debug!("Module {} not running ({}), starting directly", name, state);
            }
            _ => self.stop(name).await?,
        }
        self.start(name).await
    }

    /// Acknowledge an ERROR state, returning the module to INACTIVE
    pub async fn reset(&self, name: &str) -> Result<(), ModuleError> {
        let _guards = self.lock_modules(&[name.to_string()]).await;
        {
            let mut registry = self.registry.write().await;
            let record = registry.require_mut(name)?;
            if record.state != ModuleState::Error {
                return Err(ModuleError::InvalidState {
                    module: name.to_string(),
                    state: record.state,
                    operation: "reset".to_string(),
                });
            }
            transition(record, ModuleState::Inactive, "reset")?;
            record.last_error = None;
        }
        info!("Module {} reset", name);
        self.events
            .publish(ModuleEvent::new(name, ModuleEventKind::Reset, None))
            .await;
        self.persist_best_effort().await;
        Ok(())
    }

    /// Change whether a module may be started; never touches runtime state
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ModuleError> {
        let previous = {
            let mut registry = self.registry.write().await;
            std::mem::replace(&mut registry.require_mut(name)?.enabled, enabled)
        };
        if let Err(e) = self.persist_state().await {
            if let Some(record) = self.registry.write().await.get_mut(name) {
                record.enabled = previous;
            }
            return Err(e);
        }
        info!("Module {} {}", name, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Change whether a module starts with the host
    pub async fn set_auto_start(&self, name: &str, auto_start: bool) -> Result<(), ModuleError> {
        let previous = {
            let mut registry = self.registry.write().await;
            std::mem::replace(&mut registry.require_mut(name)?.auto_start, auto_start)
        };
        if let Err(e) = self.persist_state().await {
            if let Some(record) = self.registry.write().await.get_mut(name) {
                record.auto_start = previous;
            }
            return Err(e);
        }
        info!("Module {} auto_start set to {}", name, auto_start);
        Ok(())
    }

    /// Start every enabled auto-start module in registration order
    ///
    /// Returns the failures; one failing module does not stop the batch.
    pub async fn start_auto_start_modules(&self) -> Vec<(String, ModuleError)> {
        let candidates: Vec<String> = {
            let registry = self.registry.read().await;
            registry
                .list()
                .into_iter()
                .filter(|r| r.enabled && r.auto_start)
                .map(|r| r.name().to_string())
                .collect()
        };

        let mut failures = Vec::new();
        for name in candidates {
            if let Err(e) = self.start(&name).await {
                warn!("Auto-start of module {} failed: {}", name, e);
                failures.push((name, e));
            }
        }
        failures
    }

    /// Stop every ACTIVE module, dependents before their dependencies
    pub async fn stop_all(&self) -> Vec<(String, ModuleError)> {
        let order = {
            let registry = self.registry.read().await;
            DependencyResolver::topological_order(&*registry).unwrap_or_else(|e| {
                warn!("Falling back to registration order for shutdown: {}", e);
                registry.list().iter().map(|r| r.name().to_string()).collect()
            })
        };

        let mut failures = Vec::new();
        for name in order.iter().rev() {
            if self.state_of(name).await != Some(ModuleState::Active) {
                continue;
            }
            if let Err(e) = self.stop(name).await {
                warn!("Failed to stop module {}: {}", name, e);
                failures.push((name.clone(), e));
            }
        }
        failures
    }

    pub async fn state_of(&self, name: &str) -> Option<ModuleState> {
        self.registry.read().await.get(name).map(|r| r.state)
    }

    /// Snapshot of one module
    pub async fn info(&self, name: &str) -> Result<ModuleInfo, ModuleError> {
        let registry = self.registry.read().await;
        let record = registry.require(name)?;
        Ok(module_info(&registry, record))
    }

    /// Snapshots of every module in registration order
    pub async fn list(&self) -> Vec<ModuleInfo> {
        let registry = self.registry.read().await;
        registry
            .list()
            .into_iter()
            .map(|record| module_info(&registry, record))
            .collect()
    }

    pub async fn status(&self) -> HostStatus {
        let mut status = HostStatus::default();
        {
            let registry = self.registry.read().await;
            for record in registry.list() {
                status.total += 1;
                match record.state {
                    ModuleState::Active => status.active += 1,
                    ModuleState::Inactive => status.inactive += 1,
                    ModuleState::Starting => status.starting += 1,
                    ModuleState::Stopping => status.stopping += 1,
                    ModuleState::Error => status.error += 1,
                }
                if record.enabled {
                    status.enabled += 1;
                }
                if record.auto_start {
                    status.auto_start += 1;
                }
            }
        }
        status.flags = self.flags.snapshot().await.len();
        status.flags_version = self.flags.version().await;
        status
    }

    async fn plan_start(&self, name: &str) -> Result<Vec<String>, ModuleError> {
        let registry = self.registry.read().await;
        DependencyResolver::plan_start(&*registry, name)
    }

    fn op_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.op_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Acquire lifecycle locks for `names` in a global (name) order
    async fn lock_modules(&self, names: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<&String> = names.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for name in sorted {
            guards.push(self.op_lock(name).lock_owned().await);
        }
        guards
    }

    fn context_for(&self, name: &str, connection: Option<ConnectionHandle>) -> ModuleContext {
        ModuleContext {
            module_name: name.to_string(),
            flags: FlagClient::new(Arc::clone(&self.flags), name),
            connection,
            config: self.module_configs.get(name).cloned().unwrap_or_default(),
        }
    }

    /// Drive one module INACTIVE|ERROR -> STARTING -> ACTIVE|ERROR
    async fn run_start(&self, name: &str) -> Result<(), ModuleError> {
        let (module, definition, connection) = {
            let mut registry = self.registry.write().await;
            let record = registry.require_mut(name)?;
            transition(record, ModuleState::Starting, "start")?;
            (
                Arc::clone(&record.module),
                Arc::clone(&record.definition),
                record.connection.clone(),
            )
        };
        debug!("Module {} STARTING", name);

        if let Some(dispatcher) = &self.dispatcher {
            for command in &definition.commands {
                if let Err(e) = dispatcher.register_command(name, command) {
                    warn!("Skipping command {} of module {}: {}", command.name, name, e);
                }
            }
        }

        let module_for_error = Arc::clone(&module);
        let context = self.context_for(name, connection);
        let result = self.run_hook(name, module, Hook::Start, context).await;

        {
            let mut registry = self.registry.write().await;
            let record = registry.require_mut(name)?;
            match &result {
                Ok(()) => {
                    transition(record, ModuleState::Active, "start")?;
                    record.started_at = Some(current_timestamp_millis());
                    record.last_error = None;
                    record.start_count += 1;
                }
                Err(e) => {
                    transition(record, ModuleState::Error, "start")?;
                    record.last_error = Some(e.to_string());
                }
            }
        }

        match &result {
            Ok(()) => {
                info!("Module {} ACTIVE", name);
                self.events
                    .publish(ModuleEvent::new(name, ModuleEventKind::Started, None))
                    .await;
            }
            Err(e) => {
                error!("Module {} failed to start: {}", name, e);
                if let Some(dispatcher) = &self.dispatcher {
                    dispatcher.unregister_module(name);
                }
                self.notify_error(name, Arc::clone(&module_for_error), Hook::Start, e)
                    .await;
                self.events
                    .publish(ModuleEvent::new(
                        name,
                        ModuleEventKind::Failed,
                        Some(e.to_string()),
                    ))
                    .await;
            }
        }
        self.persist_best_effort().await;
        result
    }

    /// Drive one module ACTIVE -> STOPPING -> INACTIVE|ERROR
    async fn run_stop(&self, name: &str) -> Result<(), ModuleError> {
        let (module, connection) = {
            let mut registry = self.registry.write().await;
            let record = registry.require_mut(name)?;
            transition(record, ModuleState::Stopping, "stop")?;
            (Arc::clone(&record.module), record.connection.clone())
        };
        debug!("Module {} STOPPING", name);

        let module_for_error = Arc::clone(&module);
        let context = self.context_for(name, connection);
        let result = self.run_hook(name, module, Hook::Stop, context).await;

        {
            let mut registry = self.registry.write().await;
            let record = registry.require_mut(name)?;
            match &result {
                Ok(()) => {
                    transition(record, ModuleState::Inactive, "stop")?;
                    record.started_at = None;
                }
                Err(e) => {
                    transition(record, ModuleState::Error, "stop")?;
                    record.last_error = Some(e.to_string());
                }
            }
        }

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.unregister_module(name);
        }

        match &result {
            Ok(()) => {
                info!("Module {} INACTIVE", name);
                self.events
                    .publish(ModuleEvent::new(name, ModuleEventKind::Stopped, None))
                    .await;
            }
            Err(e) => {
                error!("Module {} failed to stop: {}", name, e);
                self.notify_error(name, Arc::clone(&module_for_error), Hook::Stop, e)
                    .await;
                self.events
                    .publish(ModuleEvent::new(
                        name,
                        ModuleEventKind::Failed,
                        Some(e.to_string()),
                    ))
                    .await;
            }
        }
        self.persist_best_effort().await;
        result
    }

    /// Run a hook on its own task under the configured timeout
    ///
    /// Errors and panics become `HookExecution`; an expired hook is aborted.
    async fn run_hook(
        &self,
        name: &str,
        module: Arc<dyn Module>,
        hook: Hook,
        context: ModuleContext,
    ) -> Result<(), ModuleError> {
        let timeout = match hook {
            Hook::Start => self.lifecycle.start_timeout(),
            Hook::Stop => self.lifecycle.stop_timeout(),
        };

        let mut handle = tokio::spawn(async move {
            match hook {
                Hook::Start => module.start(context).await,
                Hook::Stop => module.stop(context).await,
            }
        });

        match with_custom_timeout(&mut handle, timeout).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ModuleError::HookExecution {
                module: name.to_string(),
                hook: hook.name().to_string(),
                message: format!("{:#}", e),
            }),
            Ok(Err(join_error)) => Err(ModuleError::HookExecution {
                module: name.to_string(),
                hook: hook.name().to_string(),
                message: if join_error.is_panic() {
                    "hook panicked".to_string()
                } else {
                    join_error.to_string()
                },
            }),
            Err(_) => {
                handle.abort();
                Err(match hook {
                    Hook::Start => ModuleError::StartTimeout {
                        module: name.to_string(),
                        timeout,
                    },
                    Hook::Stop => ModuleError::StopTimeout {
                        module: name.to_string(),
                        timeout,
                    },
                })
            }
        }
    }

    /// Best-effort `on_error` after a failed transition
    ///
    /// Runs under the timeout of the hook that failed; panics and expiry
    /// are logged and otherwise ignored.
    async fn notify_error(
        &self,
        name: &str,
        module: Arc<dyn Module>,
        failed: Hook,
        error: &ModuleError,
    ) {
        let timeout = match failed {
            Hook::Start => self.lifecycle.start_timeout(),
            Hook::Stop => self.lifecycle.stop_timeout(),
        };
        let error = error.clone();
        let mut handle = tokio::spawn(async move { module.on_error(&error).await });

        match with_custom_timeout(&mut handle, timeout).await {
            Ok(Ok(())) => {}
            Ok(Err(join_error)) => {
                warn!("on_error hook of module {} failed: {}", name, join_error);
            }
            Err(_) => {
                handle.abort();
                warn!("on_error hook of module {} timed out after {:?}", name, timeout);
            }
        }
    }

    async fn persist_state(&self) -> Result<(), ModuleError> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let _gate = self.persist_gate.lock().await;
        let entries: Vec<(String, PersistedModuleState)> = {
            let registry = self.registry.read().await;
            registry
                .list()
                .into_iter()
                .map(|r| {
                    (
                        r.name().to_string(),
                        PersistedModuleState {
                            enabled: r.enabled,
                            auto_start: r.auto_start,
                            state: r.state,
                            last_error: r.last_error.clone(),
                            start_count: r.start_count,
                        },
                    )
                })
                .collect()
        };
        RegistryStateFile::merge_and_save(path, entries)
    }

    /// Transitions have already happened; a failed save is only logged
    async fn persist_best_effort(&self) {
        if let Err(e) = self.persist_state().await {
            warn!("Failed to persist registry state: {}", e);
        }
    }
}

fn transition(record: &mut ModuleRecord, next: ModuleState, operation: &str) -> Result<(), ModuleError> {
    if !record.state.can_transition_to(next) {
        return Err(ModuleError::InvalidState {
            module: record.name().to_string(),
            state: record.state,
            operation: operation.to_string(),
        });
    }
    record.state = next;
    Ok(())
}

fn module_info(registry: &ModuleRegistry, record: &ModuleRecord) -> ModuleInfo {
    let definition = &record.definition;
    ModuleInfo {
        name: definition.name.clone(),
        description: definition.description.clone(),
        version: definition.version.clone(),
        state: record.state,
        enabled: record.enabled,
        auto_start: record.auto_start,
        dependencies: definition.dependencies.clone(),
        dependents: registry.direct_dependents(&definition.name),
        flag_count: definition.flags.len(),
        command_count: definition.commands.len(),
        has_schema: definition.schema.is_some(),
        last_error: record.last_error.clone(),
        started_at: record.started_at,
        start_count: record.start_count,
    }
}
