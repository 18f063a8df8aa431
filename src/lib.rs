//! Modular Host - module lifecycle orchestration with shared feature flags
//!
//! Independently written modules are registered with one long-running host,
//! started and stopped in dependency order, and configured through a shared,
//! permissioned feature flag store that several local processes can read and
//! write safely.
//!
//! ## Components
//!
//! 1. `module::registry` - module records and dependency resolution
//! 2. `module::manager` - lifecycle state machine with hook timeouts
//! 3. `flags::store` - permission-checked, persisted flag values
//! 4. `flags::observer` / `flags::watcher` - change notification and
//!    cross-process reconciliation
//! 5. `host` - composition root wiring everything for one process

pub mod config;
pub mod flags;
pub mod host;
pub mod module;
pub mod modules;
pub mod utils;

pub use config::HostConfig;
pub use flags::{
    FeatureFlag, FeatureFlagStore, FlagChange, FlagClient, FlagError, FlagPermission, FlagValue,
};
pub use host::{ModuleHost, ModuleHostBuilder};
pub use module::{Module, ModuleContext, ModuleError, ModuleManager, ModuleState};
