//! Module system traits and interfaces
//!
//! Defines the capability interface every module implements and the types
//! the manager hands to module hooks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::flags::{FlagClient, FlagDeclaration, FlagError};
use crate::module::api::collaborators::ConnectionHandle;

/// Module lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    /// Registered, not running
    Inactive,
    /// Start hook in flight
    Starting,
    /// Start hook succeeded
    Active,
    /// Stop hook in flight
    Stopping,
    /// A hook failed or timed out; see `last_error`
    Error,
}

impl ModuleState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Inactive, Starting)
                | (Starting, Active)
                | (Starting, Error)
                | (Active, Stopping)
                | (Stopping, Inactive)
                | (Stopping, Error)
                | (Error, Starting)
                | (Error, Inactive)
        )
    }

    /// True for states that hold dependencies in use
    pub fn is_running(self) -> bool {
        matches!(self, ModuleState::Active | ModuleState::Starting)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Inactive => "INACTIVE",
            ModuleState::Starting => "STARTING",
            ModuleState::Active => "ACTIVE",
            ModuleState::Stopping => "STOPPING",
            ModuleState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Registry defaults a module ships with; config and persisted state override them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDefaults {
    pub enabled_by_default: bool,
    pub auto_start: bool,
}

impl Default for ModuleDefaults {
    fn default() -> Self {
        Self {
            enabled_by_default: true,
            auto_start: true,
        }
    }
}

/// Storage schema a module needs provisioned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleSchema {
    pub tables: Vec<TableDefinition>,
    #[serde(default)]
    pub indexes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    /// Column definitions, passed verbatim to the storage collaborator
    pub columns: Vec<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// One invocation of a registered command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub command: String,
    pub args: Vec<String>,
    pub invoker: String,
}

/// Command handler; returns an optional reply
pub type CommandHandler = Arc<dyn Fn(&CommandInvocation) -> anyhow::Result<Option<String>> + Send + Sync>;

/// A command a module exposes through the command dispatcher
#[derive(Clone)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub permission_required: Option<String>,
    pub cooldown: Duration,
    pub handler: CommandHandler,
}

impl CommandDefinition {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CommandInvocation) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            aliases: Vec::new(),
            permission_required: None,
            cooldown: Duration::ZERO,
            handler: Arc::new(handler),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission_required = Some(permission.into());
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Primary name followed by aliases
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("permission_required", &self.permission_required)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

/// Module trait that all modules must implement
///
/// Modules are registered statically with the host. The `declare_*` methods
/// are read once at registration; `start` and `stop` are driven by the
/// manager's state machine, each under its own timeout.
#[async_trait]
pub trait Module: Send + Sync {
    /// Unique module name
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Names of modules that must be ACTIVE before this one starts
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn defaults(&self) -> ModuleDefaults {
        ModuleDefaults::default()
    }

    /// Flags this module owns
    fn declare_flags(&self) -> Vec<FlagDeclaration> {
        Vec::new()
    }

    /// Storage schema, if the module persists data
    fn declare_schema(&self) -> Option<ModuleSchema> {
        None
    }

    /// Commands registered while the module is active
    fn declare_commands(&self) -> Vec<CommandDefinition> {
        Vec::new()
    }

    /// Start the module
    async fn start(&self, context: ModuleContext) -> anyhow::Result<()>;

    /// Stop the module (graceful shutdown)
    async fn stop(&self, context: ModuleContext) -> anyhow::Result<()>;

    /// Called after a failed start or stop, once the module is in ERROR
    async fn on_error(&self, _error: &ModuleError) {}
}

/// Context handed to module hooks
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub module_name: String,
    /// Flag access scoped to this module as requester
    pub flags: FlagClient,
    /// Storage connection acquired for this run, if storage is configured
    pub connection: Option<ConnectionHandle>,
    /// Module configuration (key-value pairs from the host config)
    pub config: HashMap<String, String>,
}

impl ModuleContext {
    /// Get a configuration value
    pub fn get_config(&self, key: &str) -> Option<&String> {
        self.config.get(key)
    }

    /// Get a configuration value with default
    pub fn get_config_or(&self, key: &str, default: &str) -> String {
        self.config
            .get(key)
            .map(|s| s.as_str())
            .unwrap_or(default)
            .to_string()
    }
}

/// Module system errors
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module {module} depends on unregistered module {dependency}")]
    DependencyMissing { module: String, dependency: String },

    #[error("Circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Module {module} is in use by: {}", dependents.join(", "))]
    ModuleInUse {
        module: String,
        dependents: Vec<String>,
    },

    #[error("Cannot {operation} module {module} in state {state}")]
    InvalidState {
        module: String,
        state: ModuleState,
        operation: String,
    },

    #[error("Module is disabled: {0}")]
    ModuleDisabled(String),

    #[error("Module {module} start hook timed out after {timeout:?}")]
    StartTimeout { module: String, timeout: Duration },

    #[error("Module {module} stop hook timed out after {timeout:?}")]
    StopTimeout { module: String, timeout: Duration },

    #[error("Module {module} {hook} hook failed: {message}")]
    HookExecution {
        module: String,
        hook: String,
        message: String,
    },

    #[error("Flag error: {0}")]
    Flag(#[from] FlagError),

    #[error("Registry persistence failed: {0}")]
    Persistence(String),
}

impl ModuleError {
    /// Module the error is attributed to, when there is one
    pub fn module(&self) -> Option<&str> {
        match self {
            ModuleError::DuplicateModule(m)
            | ModuleError::ModuleNotFound(m)
            | ModuleError::ModuleDisabled(m) => Some(m),
            ModuleError::DependencyMissing { module, .. }
            | ModuleError::ModuleInUse { module, .. }
            | ModuleError::InvalidState { module, .. }
            | ModuleError::StartTimeout { module, .. }
            | ModuleError::StopTimeout { module, .. }
            | ModuleError::HookExecution { module, .. } => Some(module),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::Persistence(e.to_string())
    }
}
