//! Module registry and dependency resolution

pub mod definition;
pub mod dependencies;
pub mod persistence;
pub mod records;

pub use definition::ModuleDefinition;
pub use dependencies::{DependencyGraph, DependencyResolver};
pub use persistence::{PersistedModuleState, RegistryStateFile};
pub use records::{ModuleRecord, ModuleRegistry};
