//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use modular_host::config::{HostConfig, LifecycleConfig};
use modular_host::flags::{
    FeatureFlagStore, FlagBackend, FlagDeclaration, FlagError, FlagFile, FlagResult,
    MemoryFlagBackend, ObserverBus,
};
use modular_host::flags::persistence::LoadedSnapshot;
use modular_host::module::{Module, ModuleContext, ModuleDefaults, ModuleError, ModuleManager};
use modular_host::utils::RetryConfig;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of hook invocations across modules
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Module whose hooks can be scripted to succeed, fail, hang or panic
pub struct TestModule {
    name: String,
    dependencies: Vec<String>,
    flags: Vec<FlagDeclaration>,
    defaults: ModuleDefaults,
    start_delay: Duration,
    stop_delay: Duration,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    panic_on_start: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    errors: Mutex<Vec<String>>,
    journal: Option<Journal>,
}

impl TestModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dependencies: Vec::new(),
            flags: Vec::new(),
            defaults: ModuleDefaults::default(),
            start_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            panic_on_start: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_flags(mut self, flags: Vec<FlagDeclaration>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_defaults(mut self, enabled_by_default: bool, auto_start: bool) -> Self {
        self.defaults = ModuleDefaults {
            enabled_by_default,
            auto_start,
        };
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_stop(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }

    pub fn panicking_start(mut self) -> Self {
        self.panic_on_start = true;
        self
    }

    pub fn journaled(mut self, journal: &Journal) -> Self {
        self.journal = Some(Arc::clone(journal));
        self
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Errors passed to `on_error`, in order
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn record(&self, hook: &str) {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("{}:{}", hook, self.name));
        }
    }
}

#[async_trait]
impl Module for TestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn defaults(&self) -> ModuleDefaults {
        self.defaults.clone()
    }

    fn declare_flags(&self) -> Vec<FlagDeclaration> {
        self.flags.clone()
    }

    async fn start(&self, _context: ModuleContext) -> anyhow::Result<()> {
        self.record("start");
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.panic_on_start {
            panic!("{} exploded during start", self.name);
        }
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("{} refused to start", self.name);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _context: ModuleContext) -> anyhow::Result<()> {
        self.record("stop");
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        if self.fail_stop.load(Ordering::SeqCst) {
            anyhow::bail!("{} refused to stop", self.name);
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_error(&self, error: &ModuleError) {
        self.record("error");
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Flag backend whose saves can be made to fail
#[derive(Default)]
pub struct FailingBackend {
    inner: MemoryFlagBackend,
    fail_saves: AtomicBool,
    pub save_attempts: AtomicUsize,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Option<FlagFile> {
        self.inner.saved()
    }
}

impl FlagBackend for FailingBackend {
    fn load(&self) -> FlagResult<Option<LoadedSnapshot>> {
        self.inner.load()
    }

    fn save(&self, file: &FlagFile) -> FlagResult<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(FlagError::Persistence("disk full".to_string()));
        }
        self.inner.save(file)
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

/// In-memory flag store with its own observer bus
pub fn memory_store() -> Arc<FeatureFlagStore> {
    store_over(Arc::new(MemoryFlagBackend::new()))
}

pub fn store_over(backend: Arc<dyn FlagBackend>) -> Arc<FeatureFlagStore> {
    Arc::new(
        FeatureFlagStore::open(backend, Arc::new(ObserverBus::new()), fast_retry())
            .expect("open flag store"),
    )
}

pub fn lifecycle(start_timeout_ms: u64, stop_timeout_ms: u64) -> LifecycleConfig {
    LifecycleConfig {
        start_timeout_ms,
        stop_timeout_ms,
        rollback_on_failure: false,
        auto_start_on_init: false,
    }
}

/// Manager over an in-memory flag store with short hook timeouts
pub fn test_manager() -> ModuleManager {
    ModuleManager::new(memory_store(), lifecycle(1_000, 1_000))
}

/// Host config rooted at `dir` with no watcher and no auto-start
pub fn test_config(dir: &Path) -> HostConfig {
    let mut config = HostConfig::with_data_dir(dir);
    config.flags.watch = false;
    config.flags.debounce_ms = 50;
    config.flags.persist_retry.initial_delay_ms = 1;
    config.flags.persist_retry.max_delay_ms = 5;
    config.lifecycle = lifecycle(1_000, 1_000);
    config
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
