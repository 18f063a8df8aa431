//! Feature flags shared between modules and host processes
//!
//! - `store`: permission-checked, persisted flag values
//! - `observer`: change notifications
//! - `watcher`: reconciliation with writes from other processes

pub mod client;
pub mod error;
pub mod observer;
pub mod permissions;
pub mod persistence;
pub mod store;
pub mod types;
pub mod watcher;

pub use client::FlagClient;
pub use error::{FlagError, FlagResult};
pub use observer::{ObserverBus, SubscriptionId, Topic};
pub use permissions::Access;
pub use persistence::{FlagBackend, FlagFile, JsonFileBackend, MemoryFlagBackend, PersistedFlag};
pub use store::FeatureFlagStore;
pub use types::{
    ChangeOrigin, FeatureFlag, FlagChange, FlagDeclaration, FlagEntry, FlagPermission, FlagType,
    FlagValue,
};
pub use watcher::{reconcile_loop, ConfigWatcher, ReloadSignal};
