//! Module registry
//!
//! One `ModuleRecord` per registered module, keyed by name, plus the
//! registration order used for deterministic planning. The registry itself
//! enforces uniqueness, acyclicity and safe removal; state transitions are
//! made only by the manager.

use std::collections::HashMap;
use std::sync::Arc;

use super::definition::ModuleDefinition;
use super::dependencies::{DependencyGraph, DependencyResolver};
use crate::module::api::collaborators::ConnectionHandle;
use crate::module::traits::{Module, ModuleError, ModuleState};

/// Definition plus runtime fields
#[derive(Clone)]
pub struct ModuleRecord {
    pub definition: Arc<ModuleDefinition>,
    pub module: Arc<dyn Module>,
    pub state: ModuleState,
    pub enabled: bool,
    pub auto_start: bool,
    pub last_error: Option<String>,
    /// Milliseconds since the Unix epoch of the last successful start
    pub started_at: Option<u64>,
    pub start_count: u64,
    /// Storage connection acquired at registration
    pub connection: Option<ConnectionHandle>,
}

impl ModuleRecord {
    pub fn new(definition: ModuleDefinition, module: Arc<dyn Module>, enabled: bool, auto_start: bool) -> Self {
        Self {
            definition: Arc::new(definition),
            module,
            state: ModuleState::Inactive,
            enabled,
            auto_start,
            last_error: None,
            started_at: None,
            start_count: 0,
            connection: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.definition.name)
            .field("state", &self.state)
            .field("enabled", &self.enabled)
            .field("auto_start", &self.auto_start)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    records: HashMap<String, ModuleRecord>,
    order: Vec<String>,
}

/// The registry as it would look with one more definition
struct WithCandidate<'a> {
    registry: &'a ModuleRegistry,
    candidate: &'a ModuleDefinition,
}

impl DependencyGraph for WithCandidate<'_> {
    fn dependencies_of(&self, name: &str) -> Option<Vec<String>> {
        if name == self.candidate.name {
            return Some(self.candidate.dependencies.clone());
        }
        self.registry.dependencies_of(name)
    }

    fn registration_index(&self, name: &str) -> Option<usize> {
        if name == self.candidate.name {
            return Some(self.registry.order.len());
        }
        self.registry.registration_index(name)
    }

    fn module_names(&self) -> Vec<String> {
        let mut names = self.registry.module_names();
        names.push(self.candidate.name.clone());
        names
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a definition without inserting it
    pub fn check_registrable(&self, definition: &ModuleDefinition) -> Result<(), ModuleError> {
        if self.records.contains_key(&definition.name) {
            return Err(ModuleError::DuplicateModule(definition.name.clone()));
        }
        let graph = WithCandidate {
            registry: self,
            candidate: definition,
        };
        DependencyResolver::check_acyclic(&graph, &definition.name)?;
        // Modules registered earlier may name the candidate as a dependency
        for name in &self.order {
            DependencyResolver::check_acyclic(&graph, name)?;
        }
        Ok(())
    }

    /// Insert a record; fails without change on duplicates or cycles
    pub fn register(&mut self, record: ModuleRecord) -> Result<(), ModuleError> {
        self.check_registrable(&record.definition)?;
        let name = record.name().to_string();
        self.order.push(name.clone());
        self.records.insert(name, record);
        Ok(())
    }

    /// Remove an INACTIVE module nothing running depends on
    pub fn unregister(&mut self, name: &str) -> Result<ModuleRecord, ModuleError> {
        let record = self
            .records
            .get(name)
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))?;

        let running: Vec<String> = DependencyResolver::transitive_dependents(self, name)
            .into_iter()
            .filter(|d| self.records.get(d).map(|r| r.state.is_running()).unwrap_or(false))
            .collect();
        if !running.is_empty() {
            return Err(ModuleError::ModuleInUse {
                module: name.to_string(),
                dependents: running,
            });
        }

        if record.state != ModuleState::Inactive {
            return Err(ModuleError::InvalidState {
                module: name.to_string(),
                state: record.state,
                operation: "unregister".to_string(),
            });
        }

        self.order.retain(|n| n != name);
        self.records
            .remove(name)
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ModuleRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModuleRecord> {
        self.records.get_mut(name)
    }

    /// Lookup that maps absence to `ModuleNotFound`
    pub fn require(&self, name: &str) -> Result<&ModuleRecord, ModuleError> {
        self.get(name)
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut ModuleRecord, ModuleError> {
        self.get_mut(name)
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))
    }

    /// Records in registration order
    pub fn list(&self) -> Vec<&ModuleRecord> {
        self.order
            .iter()
            .filter_map(|name| self.records.get(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Modules that list `name` as a direct dependency
    pub fn direct_dependents(&self, name: &str) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|r| r.definition.depends_on(name))
            .map(|r| r.name().to_string())
            .collect()
    }
}

impl DependencyGraph for ModuleRegistry {
    fn dependencies_of(&self, name: &str) -> Option<Vec<String>> {
        self.records
            .get(name)
            .map(|r| r.definition.dependencies.clone())
    }

    fn registration_index(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    fn module_names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn state_of(&self, name: &str) -> Option<ModuleState> {
        self.records.get(name).map(|r| r.state)
    }
}
