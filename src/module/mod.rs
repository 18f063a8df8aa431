//! Module system
//!
//! Modules are statically registered feature units with declared
//! dependencies, flags, schema and commands.
//!
//! ## Architecture
//!
//! - **Registry**: one record per module, unique names, acyclic dependencies
//! - **Resolver**: deterministic start plans, cycle and in-use detection
//! - **Manager**: per-module state machine with hook timeouts and isolation
//! - **Collaborators**: storage and command dispatch behind narrow traits

pub mod api;
pub mod manager;
pub mod registry;
pub mod traits;

pub use api::{
    CommandDispatcher, CommandTable, ConnectionHandle, InMemoryStorage, ModuleEvent,
    ModuleEventHub, ModuleEventKind, StorageBackend,
};
pub use manager::{HostStatus, ModuleInfo, ModuleManager};
pub use registry::{DependencyGraph, DependencyResolver, ModuleDefinition, ModuleRegistry};
pub use traits::{
    CommandDefinition, CommandInvocation, Module, ModuleContext, ModuleDefaults, ModuleError,
    ModuleSchema, ModuleState, TableDefinition,
};
