//! Interfaces between the manager and the outside world
//!
//! Lifecycle events for observers, and the storage and command-dispatch
//! collaborators modules are wired to.

pub mod collaborators;
pub mod events;

pub use collaborators::{
    CollaboratorError, CommandDispatcher, CommandTable, ConnectionHandle, InMemoryStorage,
    StorageBackend,
};
pub use events::{ModuleEvent, ModuleEventHub, ModuleEventKind};
