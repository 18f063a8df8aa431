//! Immutable module definitions
//!
//! Captured once from a module's declarations at registration. Replacing a
//! definition requires unregister + register.

use crate::flags::FlagDeclaration;
use crate::module::traits::{CommandDefinition, Module, ModuleDefaults, ModuleSchema};

#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    pub name: String,
    pub description: String,
    pub version: String,
    /// Declared dependencies, duplicates removed, declaration order kept
    pub dependencies: Vec<String>,
    pub flags: Vec<FlagDeclaration>,
    pub schema: Option<ModuleSchema>,
    pub commands: Vec<CommandDefinition>,
    pub defaults: ModuleDefaults,
}

impl ModuleDefinition {
    /// Snapshot a module's declarations
    pub fn from_module(module: &dyn Module) -> Self {
        let mut dependencies: Vec<String> = Vec::new();
        for dep in module.dependencies() {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        Self {
            name: module.name().to_string(),
            description: module.description().to_string(),
            version: module.version().to_string(),
            dependencies,
            flags: module.declare_flags(),
            schema: module.declare_schema(),
            commands: module.declare_commands(),
            defaults: module.defaults(),
        }
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }
}
