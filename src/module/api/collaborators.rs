//! External collaborators the manager drives on a module's behalf
//!
//! Storage provisioning and command dispatch live outside the core. The
//! manager only calls these traits; the in-process implementations here are
//! the defaults used by the host and the tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::module::traits::{CommandDefinition, CommandInvocation, ModuleSchema};

/// Collaborator failures; logged by the manager, never fatal to a lifecycle step
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("Schema rejected: {0}")]
    Schema(String),

    #[error("Storage unavailable: {0}")]
    Storage(String),

    #[error("Command already registered: {0}")]
    CommandConflict(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command {command} is cooling down for another {remaining:?}")]
    CoolingDown { command: String, remaining: Duration },

    #[error("Command {command} failed: {message}")]
    CommandFailed { command: String, message: String },
}

/// Handle to a storage connection acquired for one module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub module: String,
}

/// Storage collaborator: schema provisioning and connections
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Provision the module's schema; called once at registration
    async fn apply_schema(&self, module: &str, schema: &ModuleSchema) -> Result<(), CollaboratorError>;

    /// Acquire a connection for a module run
    async fn acquire_connection(&self, module: &str) -> Result<ConnectionHandle, CollaboratorError>;
}

/// Storage collaborator that only records what it was asked to do
#[derive(Default)]
pub struct InMemoryStorage {
    schemas: Mutex<HashMap<String, ModuleSchema>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema applied for `module`, if any
    pub fn schema_for(&self, module: &str) -> Option<ModuleSchema> {
        self.schemas
            .lock()
            .ok()
            .and_then(|schemas| schemas.get(module).cloned())
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn apply_schema(&self, module: &str, schema: &ModuleSchema) -> Result<(), CollaboratorError> {
        if let Some(table) = schema.tables.iter().find(|t| t.columns.is_empty()) {
            return Err(CollaboratorError::Schema(format!(
                "table {} has no columns",
                table.name
            )));
        }
        let mut schemas = self
            .schemas
            .lock()
            .map_err(|_| CollaboratorError::Storage("schema table poisoned".to_string()))?;
        schemas.insert(module.to_string(), schema.clone());
        debug!(
            "Applied schema for {} ({} tables)",
            module,
            schema.tables.len()
        );
        Ok(())
    }

    async fn acquire_connection(&self, module: &str) -> Result<ConnectionHandle, CollaboratorError> {
        Ok(ConnectionHandle {
            id: Uuid::new_v4(),
            module: module.to_string(),
        })
    }
}

/// Command-dispatch collaborator
pub trait CommandDispatcher: Send + Sync {
    fn register_command(&self, module: &str, definition: &CommandDefinition) -> Result<(), CollaboratorError>;

    /// Remove every command registered by `module`; returns how many were removed
    fn unregister_module(&self, module: &str) -> usize;
}

struct RegisteredCommand {
    module: String,
    definition: CommandDefinition,
}

/// In-process command table keyed by name and alias
///
/// Cooldowns are tracked per primary command name, so an alias shares the
/// cooldown of the command it points to.
#[derive(Default)]
pub struct CommandTable {
    commands: Mutex<HashMap<String, RegisteredCommand>>,
    last_used: Mutex<HashMap<String, Instant>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted names (including aliases) currently routable
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .lock()
            .map(|commands| commands.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Route an invocation to its handler
    ///
    /// Fails with `CoolingDown` when the command ran less than its cooldown ago.
    pub fn dispatch(&self, invocation: &CommandInvocation) -> Result<Option<String>, CollaboratorError> {
        let definition = {
            let commands = self
                .commands
                .lock()
                .map_err(|_| CollaboratorError::UnknownCommand(invocation.command.clone()))?;
            commands
                .get(&invocation.command)
                .map(|c| c.definition.clone())
                .ok_or_else(|| CollaboratorError::UnknownCommand(invocation.command.clone()))?
        };

        if !definition.cooldown.is_zero() {
            let mut last_used = self
                .last_used
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            if let Some(previous) = last_used.get(&definition.name) {
                let elapsed = now.duration_since(*previous);
                if elapsed < definition.cooldown {
                    debug!("Command {} on cooldown", definition.name);
                    return Err(CollaboratorError::CoolingDown {
                        command: definition.name.clone(),
                        remaining: definition.cooldown - elapsed,
                    });
                }
            }
            last_used.insert(definition.name.clone(), now);
        }

        (definition.handler)(invocation).map_err(|e| CollaboratorError::CommandFailed {
            command: invocation.command.clone(),
            message: e.to_string(),
        })
    }
}

impl CommandDispatcher for CommandTable {
    fn register_command(&self, module: &str, definition: &CommandDefinition) -> Result<(), CollaboratorError> {
        let mut commands = self
            .commands
            .lock()
            .map_err(|_| CollaboratorError::CommandConflict(definition.name.clone()))?;

        for name in definition.all_names() {
            if let Some(existing) = commands.get(name) {
                if existing.module != module {
                    return Err(CollaboratorError::CommandConflict(format!(
                        "{} (owned by {})",
                        name, existing.module
                    )));
                }
            }
        }

        for name in definition.all_names() {
            commands.insert(
                name.to_string(),
                RegisteredCommand {
                    module: module.to_string(),
                    definition: definition.clone(),
                },
            );
        }
        info!("Registered command {} for {}", definition.name, module);
        Ok(())
    }

    fn unregister_module(&self, module: &str) -> usize {
        let Ok(mut commands) = self.commands.lock() else {
            return 0;
        };
        let before = commands.len();
        let mut removed = Vec::new();
        commands.retain(|_, c| {
            if c.module == module {
                removed.push(c.definition.name.clone());
                false
            } else {
                true
            }
        });
        if let Ok(mut last_used) = self.last_used.lock() {
            for name in &removed {
                last_used.remove(name);
            }
        }
        before - commands.len()
    }
}
