//! Configuration management for modular-host
//!
//! Handles configuration loading (JSON or TOML), defaults, and validation.
//! Every field has a serde default so an empty document is a valid config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{RetryConfig, DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT};

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Base directory for persisted state; relative file names resolve here
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Persisted module registry state (enabled, auto_start, state, last_error)
    #[serde(default = "default_registry_file")]
    pub registry_file: String,

    /// Feature flag store configuration
    #[serde(default)]
    pub flags: FeatureFlagConfig,

    /// Lifecycle timeouts and failure policy
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Per-module enabled/auto_start overrides (applied at registration)
    #[serde(default)]
    pub modules: HashMap<String, ModuleOverride>,

    /// Module-specific key/value configuration handed to module hooks
    #[serde(default)]
    pub module_configs: HashMap<String, HashMap<String, String>>,

    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_registry_file() -> String {
    "module_registry.json".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            registry_file: default_registry_file(),
            flags: FeatureFlagConfig::default(),
            lifecycle: LifecycleConfig::default(),
            modules: HashMap::new(),
            module_configs: HashMap::new(),
            logging: None,
        }
    }
}

/// Feature flag store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlagConfig {
    /// Persisted flag file shared by every host process on this machine
    #[serde(default = "default_flags_path")]
    pub path: String,

    /// Watch the flag file for external modification
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Debounce window for coalescing bursts of external writes (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Retry policy for persisting a flag write
    #[serde(default)]
    pub persist_retry: PersistRetryConfig,
}

fn default_flags_path() -> String {
    "feature_flags.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for FeatureFlagConfig {
    fn default() -> Self {
        Self {
            path: default_flags_path(),
            watch: true,
            debounce_ms: default_debounce_ms(),
            persist_retry: PersistRetryConfig::default(),
        }
    }
}

impl FeatureFlagConfig {
    /// Debounce window as a Duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Bounded retry with exponential backoff for durable writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistRetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for PersistRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl From<&PersistRetryConfig> for RetryConfig {
    fn from(config: &PersistRetryConfig) -> Self {
        RetryConfig {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

/// Lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound for a single start hook (ms)
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Upper bound for a single stop hook (ms)
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Stop already-started plan members (reverse order) when a start plan fails
    #[serde(default)]
    pub rollback_on_failure: bool,

    /// Start enabled + auto_start modules when the host initializes
    #[serde(default = "default_true")]
    pub auto_start_on_init: bool,
}

fn default_start_timeout_ms() -> u64 {
    DEFAULT_START_TIMEOUT.as_millis() as u64
}

fn default_stop_timeout_ms() -> u64 {
    DEFAULT_STOP_TIMEOUT.as_millis() as u64
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            rollback_on_failure: false,
            auto_start_on_init: true,
        }
    }
}

impl LifecycleConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Per-module registry overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleOverride {
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub auto_start: Option<bool>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "modular_host=debug"); RUST_LOG wins if set
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the json-logging feature)
    #[serde(default)]
    pub json_format: bool,
}

impl HostConfig {
    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HostConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HostConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, picking the format from the file extension
    /// (`.toml` is TOML, anything else is JSON), then validate it
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_file(path)?,
            _ => Self::from_json_file(path)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.registry_file.trim().is_empty() {
            anyhow::bail!("registry_file must not be empty");
        }
        if self.flags.path.trim().is_empty() {
            anyhow::bail!("flags.path must not be empty");
        }
        if self.lifecycle.start_timeout_ms == 0 || self.lifecycle.stop_timeout_ms == 0 {
            anyhow::bail!("lifecycle hook timeouts must be greater than zero");
        }
        if self.flags.persist_retry.max_attempts == 0 {
            anyhow::bail!("flags.persist_retry.max_attempts must be at least 1");
        }
        if self.flags.persist_retry.backoff_multiplier < 1.0 {
            anyhow::bail!("flags.persist_retry.backoff_multiplier must be >= 1.0");
        }
        Ok(())
    }

    /// Resolve a configured file name against `data_dir`
    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.data_dir).join(path)
        }
    }

    /// Absolute or data_dir-relative path of the registry state file
    pub fn registry_path(&self) -> PathBuf {
        self.resolve(&self.registry_file)
    }

    /// Absolute or data_dir-relative path of the flag file
    pub fn flags_path(&self) -> PathBuf {
        self.resolve(&self.flags.path)
    }

    /// Retry policy for flag persistence
    pub fn persist_retry(&self) -> RetryConfig {
        RetryConfig::from(&self.flags.persist_retry)
    }

    /// Config rooted at `data_dir`, used by tests and embedding callers
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_string_lossy().to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: HostConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.registry_file, "module_registry.json");
        assert_eq!(config.flags.debounce_ms, 100);
        assert!(config.flags.watch);
        assert_eq!(config.lifecycle.start_timeout(), Duration::from_secs(30));
        assert!(!config.lifecycle.rollback_on_failure);
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/var/lib/host"

[lifecycle]
start_timeout_ms = 500
rollback_on_failure = true

[modules.alerts]
enabled = false
"#,
        )
        .unwrap();

        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.lifecycle.start_timeout_ms, 500);
        assert!(config.lifecycle.rollback_on_failure);
        assert_eq!(config.modules["alerts"].enabled, Some(false));
        assert_eq!(config.modules["alerts"].auto_start, None);
        assert_eq!(
            config.flags_path(),
            PathBuf::from("/var/lib/host/feature_flags.json")
        );
    }

    #[test]
    fn test_json_round_trip_and_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.json");

        let mut config = HostConfig::with_data_dir(dir.path());
        config.lifecycle.stop_timeout_ms = 0;
        config.to_json_file(&path).unwrap();

        assert!(HostConfig::from_json_file(&path).is_ok());
        assert!(HostConfig::load(&path).is_err());
    }
}
