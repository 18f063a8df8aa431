//! Feature flag store
//!
//! Holds one `FlagEntry` per flag behind a copy-on-write snapshot: readers
//! clone an `Arc` and never wait on writers. Every mutation goes through a
//! single write gate, so writes on the same key have one total order, and
//! the change is persisted before it becomes visible. Observers are notified
//! while the gate is still held, which keeps each notification's
//! `(old, new)` pair consistent with the commit order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::error::{FlagError, FlagResult};
use super::observer::ObserverBus;
use super::permissions::{check_access, Access};
use super::persistence::{FlagBackend, FlagFile, PersistedFlag};
use super::types::{
    ChangeOrigin, FeatureFlag, FlagChange, FlagDeclaration, FlagEntry, FlagPermission, FlagType,
    FlagValue,
};
use crate::utils::{current_timestamp_millis, retry_with_backoff, system_time_millis, RetryConfig};

type FlagMap = HashMap<String, FlagEntry>;

/// Requester recorded for changes picked up from another process
pub const EXTERNAL_REQUESTER: &str = "external";

/// Shared, permission-checked flag store
pub struct FeatureFlagStore {
    entries: RwLock<Arc<FlagMap>>,
    /// Serializes mutations; holds the document version last persisted
    write_gate: Mutex<u64>,
    backend: Arc<dyn FlagBackend>,
    bus: Arc<ObserverBus>,
    retry: RetryConfig,
}

impl FeatureFlagStore {
    /// Open the store over `backend`, loading whatever is persisted
    ///
    /// Loaded entries are undeclared until their owner registers them. A
    /// malformed document is returned as `ConfigCorruption`.
    pub fn open(
        backend: Arc<dyn FlagBackend>,
        bus: Arc<ObserverBus>,
        retry: RetryConfig,
    ) -> FlagResult<Self> {
        let (entries, version) = match backend.load()? {
            Some(snapshot) => {
                let entries: FlagMap = snapshot
                    .file
                    .flags
                    .iter()
                    .map(|(name, persisted)| (name.clone(), entry_from_persisted(name, persisted)))
                    .collect();
                info!(
                    "Loaded {} persisted flags (version {})",
                    entries.len(),
                    snapshot.file.version
                );
                (entries, snapshot.file.version)
            }
            None => {
                debug!("No persisted flags found, starting empty");
                (FlagMap::new(), 0)
            }
        };

        Ok(Self {
            entries: RwLock::new(Arc::new(entries)),
            write_gate: Mutex::new(version),
            backend,
            bus,
            retry,
        })
    }

    /// Observer bus the store publishes to
    pub fn bus(&self) -> &Arc<ObserverBus> {
        &self.bus
    }

    /// Path of the backing file, if file based
    pub fn backend_path(&self) -> Option<&Path> {
        self.backend.path()
    }

    /// Version of the last persisted document
    pub async fn version(&self) -> u64 {
        *self.write_gate.lock().await
    }

    /// Consistent read-only view of every entry
    pub async fn snapshot(&self) -> Arc<HashMap<String, FlagEntry>> {
        Arc::clone(&*self.entries.read().await)
    }

    /// Every entry sorted by name
    pub async fn list(&self) -> Vec<FlagEntry> {
        let snapshot = self.snapshot().await;
        let mut entries: Vec<FlagEntry> = snapshot.values().cloned().collect();
        entries.sort_by(|a, b| a.flag.name.cmp(&b.flag.name));
        entries
    }

    /// Number of declared flags owned by `owner`
    pub async fn count_owned(&self, owner: &str) -> usize {
        self.snapshot()
            .await
            .values()
            .filter(|e| e.declared && e.owner == owner)
            .count()
    }

    /// Register a single flag
    pub async fn register_flag(
        &self,
        flag: FeatureFlag,
        permission: FlagPermission,
        owner: &str,
    ) -> FlagResult<()> {
        self.register_flags(owner, &[FlagDeclaration::new(flag, permission)])
            .await
    }

    /// Register a module's declarations atomically
    ///
    /// Either every declaration is accepted and persisted, or nothing changes.
    /// An undeclared entry with the same owner (loaded from disk) is adopted,
    /// keeping its value when the declared type still accepts it.
    pub async fn register_flags(&self, owner: &str, declarations: &[FlagDeclaration]) -> FlagResult<()> {
        if declarations.is_empty() {
            return Ok(());
        }

        let mut version = self.write_gate.lock().await;
        let current = self.snapshot().await;
        let mut next: FlagMap = (*current).clone();
        let now = current_timestamp_millis();

        for declaration in declarations {
            let flag = &declaration.flag;
            if !flag.is_well_formed() {
                return Err(FlagError::InvalidDeclaration(format!(
                    "flag {} default {} is not a valid {}",
                    flag.name, flag.default_value, flag.value_type
                )));
            }

            let entry = match next.get(&flag.name) {
                Some(existing) if existing.declared || existing.owner != owner => {
                    return Err(FlagError::DuplicateFlag {
                        name: flag.name.clone(),
                        owner: existing.owner.clone(),
                    });
                }
                Some(existing) => {
                    let value = if flag.value_type.accepts(&existing.value) {
                        existing.value.clone()
                    } else {
                        warn!(
                            "Persisted value {} of flag {} does not fit declared type {}, resetting to default",
                            existing.value, flag.name, flag.value_type
                        );
                        flag.default_value.clone()
                    };
                    debug!("Adopting persisted flag {} for {}", flag.name, owner);
                    FlagEntry {
                        flag: flag.clone(),
                        owner: owner.to_string(),
                        permission: declaration.permission,
                        value,
                        last_modified_by: existing.last_modified_by.clone(),
                        last_modified_at: existing.last_modified_at,
                        declared: true,
                    }
                }
                None => FlagEntry {
                    flag: flag.clone(),
                    owner: owner.to_string(),
                    permission: declaration.permission,
                    value: flag.default_value.clone(),
                    last_modified_by: owner.to_string(),
                    last_modified_at: now,
                    declared: true,
                },
            };
            next.insert(flag.name.clone(), entry);
        }

        let next_version = *version + 1;
        self.persist(&next, next_version).await?;
        *self.entries.write().await = Arc::new(next);
        *version = next_version;

        info!("Registered {} flags for {}", declarations.len(), owner);
        Ok(())
    }

    /// Mark every flag owned by `owner` as undeclared, keeping values
    ///
    /// Returns how many flags were retired. Nothing is persisted because the
    /// declared marker is process-local.
    pub async fn retire_owner(&self, owner: &str) -> usize {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot().await;
        let mut next: FlagMap = (*current).clone();
        let mut retired = 0;
        for entry in next.values_mut() {
            if entry.owner == owner && entry.declared {
                entry.declared = false;
                retired += 1;
            }
        }
        if retired > 0 {
            *self.entries.write().await = Arc::new(next);
            debug!("Retired {} flags owned by {}", retired, owner);
        }
        retired
    }

    /// Read a flag's entry on behalf of `requester`
    pub async fn get_entry(&self, name: &str, requester: &str) -> FlagResult<FlagEntry> {
        let snapshot = self.snapshot().await;
        let entry = snapshot
            .get(name)
            .ok_or_else(|| FlagError::FlagNotFound(name.to_string()))?;
        check_access(entry, requester, Access::Read)?;
        Ok(entry.clone())
    }

    /// Read a flag's current value on behalf of `requester`
    pub async fn get_value(&self, name: &str, requester: &str) -> FlagResult<FlagValue> {
        self.get_entry(name, requester).await.map(|entry| entry.value)
    }

    /// Write a flag on behalf of `requester`
    ///
    /// Checks permission and type, persists (with bounded retry), commits and
    /// notifies observers. On any failure the entry is unchanged and no
    /// notification is sent.
    pub async fn set_value(
        &self,
        name: &str,
        value: FlagValue,
        requester: &str,
    ) -> FlagResult<FlagChange> {
        let mut version = self.write_gate.lock().await;
        let current = self.snapshot().await;

        let entry = current
            .get(name)
            .ok_or_else(|| FlagError::FlagNotFound(name.to_string()))?;
        check_access(entry, requester, Access::Write)?;
        if !entry.flag.value_type.accepts(&value) {
            return Err(FlagError::TypeMismatch {
                flag: name.to_string(),
                expected: entry.flag.value_type.to_string(),
                actual: value.kind().to_string(),
            });
        }

        let old_value = entry.value.clone();
        let mut next: FlagMap = (*current).clone();
        if let Some(updated) = next.get_mut(name) {
            updated.value = value.clone();
            updated.last_modified_by = requester.to_string();
            updated.last_modified_at = current_timestamp_millis();
        }

        let next_version = *version + 1;
        self.persist(&next, next_version).await?;
        *self.entries.write().await = Arc::new(next);
        *version = next_version;

        info!(
            "Flag {} set {} -> {} by {}",
            name, old_value, value, requester
        );

        let change = FlagChange {
            name: name.to_string(),
            old_value,
            new_value: value,
            modified_by: requester.to_string(),
            origin: ChangeOrigin::Local,
        };
        self.bus.publish(&change).await;
        Ok(change)
    }

    /// Reconcile memory with the persisted document written by another process
    ///
    /// Only keys whose values differ are applied and published. When the file
    /// modification time is known, a local entry modified after it wins and is
    /// written back. A malformed document leaves memory untouched and is
    /// returned as `ConfigCorruption`.
    pub async fn reload_from_backend(&self) -> FlagResult<Vec<FlagChange>> {
        let mut version = self.write_gate.lock().await;

        let snapshot = match self.backend.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("Flag file missing during reconcile, keeping in-memory state");
                return Ok(Vec::new());
            }
            Err(e) => {
                error!("Discarding external flag file: {}", e);
                return Err(e);
            }
        };

        let file_time = snapshot.modified.map(system_time_millis);
        let current = self.snapshot().await;
        let mut next: FlagMap = (*current).clone();
        let mut changes = Vec::new();
        let mut write_back = false;

        for (name, persisted) in &snapshot.file.flags {
            let Some(entry) = next.get_mut(name) else {
                debug!("New external flag {} (owner {})", name, persisted.owner);
                next.insert(name.clone(), entry_from_persisted(name, persisted));
                continue;
            };

            if entry.value == persisted.value {
                continue;
            }

            if let Some(file_time) = file_time {
                if entry.last_modified_at > file_time {
                    warn!(
                        "Local value of flag {} is newer than the external file, keeping {}",
                        name, entry.value
                    );
                    write_back = true;
                    continue;
                }
            }

            if !entry.flag.value_type.accepts(&persisted.value) {
                warn!(
                    "External value {} for flag {} does not fit type {}, ignoring",
                    persisted.value, name, entry.flag.value_type
                );
                write_back = true;
                continue;
            }

            let modified_by = persisted
                .modified_by
                .clone()
                .unwrap_or_else(|| EXTERNAL_REQUESTER.to_string());
            let change = FlagChange {
                name: name.clone(),
                old_value: entry.value.clone(),
                new_value: persisted.value.clone(),
                modified_by: modified_by.clone(),
                origin: ChangeOrigin::External,
            };
            entry.value = persisted.value.clone();
            entry.last_modified_by = modified_by;
            entry.last_modified_at = if persisted.updated_at > 0 {
                persisted.updated_at
            } else {
                file_time.unwrap_or_else(current_timestamp_millis)
            };
            changes.push(change);
        }

        // Declared flags the other process does not know about
        if next
            .iter()
            .any(|(name, e)| e.declared && !snapshot.file.flags.contains_key(name))
        {
            write_back = true;
        }

        let mut next_version = (*version).max(snapshot.file.version);
        if write_back {
            next_version += 1;
            if let Err(e) = self.persist(&next, next_version).await {
                warn!("Failed to write back reconciled flags: {}", e);
                next_version -= 1;
            }
        }

        *self.entries.write().await = Arc::new(next);
        *version = next_version;

        if !changes.is_empty() {
            info!("Applied {} external flag changes", changes.len());
        }
        for change in &changes {
            self.bus.publish(change).await;
        }
        Ok(changes)
    }

    async fn persist(&self, entries: &FlagMap, version: u64) -> FlagResult<()> {
        let file = to_file(entries, version);
        retry_with_backoff(&self.retry, || self.backend.save(&file))
            .await
            .map_err(|e| {
                error!("Giving up persisting flags: {}", e);
                match e {
                    FlagError::Persistence(_) => e,
                    other => FlagError::Persistence(other.to_string()),
                }
            })
    }
}

fn entry_from_persisted(name: &str, persisted: &PersistedFlag) -> FlagEntry {
    let value_type = persisted
        .value_type
        .clone()
        .unwrap_or_else(|| FlagType::infer(&persisted.value));
    FlagEntry {
        flag: FeatureFlag::new(
            name,
            persisted.description.clone().unwrap_or_default(),
            value_type,
            persisted.value.clone(),
        ),
        owner: persisted.owner.clone(),
        permission: persisted.permission,
        value: persisted.value.clone(),
        last_modified_by: persisted
            .modified_by
            .clone()
            .unwrap_or_else(|| persisted.owner.clone()),
        last_modified_at: persisted.updated_at,
        declared: false,
    }
}

fn to_file(entries: &FlagMap, version: u64) -> FlagFile {
    let mut file = FlagFile {
        version,
        ..FlagFile::default()
    };
    for (name, entry) in entries {
        file.flags.insert(
            name.clone(),
            PersistedFlag {
                value: entry.value.clone(),
                value_type: Some(entry.flag.value_type.clone()),
                permission: entry.permission,
                owner: entry.owner.clone(),
                updated_at: entry.last_modified_at,
                modified_by: Some(entry.last_modified_by.clone()),
                description: if entry.flag.description.is_empty() {
                    None
                } else {
                    Some(entry.flag.description.clone())
                },
            },
        );
    }
    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::persistence::MemoryFlagBackend;

    fn store_over(backend: Arc<MemoryFlagBackend>) -> FeatureFlagStore {
        FeatureFlagStore::open(backend, Arc::new(ObserverBus::new()), RetryConfig::no_retry())
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_is_atomic() {
        let backend = Arc::new(MemoryFlagBackend::new());
        let store = store_over(backend.clone());
        store
            .register_flag(FeatureFlag::bool("a", "", false), FlagPermission::ReadWrite, "m1")
            .await
            .unwrap();

        let result = store
            .register_flags(
                "m2",
                &[
                    FlagDeclaration::new(FeatureFlag::int("b", "", 1), FlagPermission::ReadOnly),
                    FlagDeclaration::new(FeatureFlag::bool("a", "", true), FlagPermission::ReadOnly),
                ],
            )
            .await;

        assert!(matches!(result, Err(FlagError::DuplicateFlag { ref owner, .. }) if owner == "m1"));
        assert!(store.snapshot().await.get("b").is_none());
        assert_eq!(store.version().await, 1);
    }

    #[tokio::test]
    async fn test_adopts_persisted_value_for_same_owner() {
        let backend = Arc::new(MemoryFlagBackend::new());
        {
            let store = store_over(backend.clone());
            store
                .register_flag(FeatureFlag::int("volume", "", 5), FlagPermission::ReadOnly, "alerts")
                .await
                .unwrap();
            store.set_value("volume", FlagValue::Int(9), "alerts").await.unwrap();
        }

        let store = store_over(backend.clone());
        assert!(!store.snapshot().await["volume"].declared);

        let stolen = store
            .register_flag(FeatureFlag::int("volume", "", 5), FlagPermission::ReadOnly, "other")
            .await;
        assert!(matches!(stolen, Err(FlagError::DuplicateFlag { .. })));

        store
            .register_flag(FeatureFlag::int("volume", "", 5), FlagPermission::ReadOnly, "alerts")
            .await
            .unwrap();
        assert_eq!(store.get_value("volume", "alerts").await.unwrap(), FlagValue::Int(9));
        assert_eq!(store.count_owned("alerts").await, 1);

        assert_eq!(store.retire_owner("alerts").await, 1);
        assert_eq!(store.count_owned("alerts").await, 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_leaves_entry_unchanged() {
        let store = store_over(Arc::new(MemoryFlagBackend::new()));
        store
            .register_flag(
                FeatureFlag::enumeration("style", "", &["chime", "siren"], "chime"),
                FlagPermission::ReadWrite,
                "alerts",
            )
            .await
            .unwrap();

        let result = store
            .set_value("style", FlagValue::Enum("horn".into()), "alerts")
            .await;
        assert!(matches!(result, Err(FlagError::TypeMismatch { .. })));
        assert_eq!(
            store.get_value("style", "x").await.unwrap(),
            FlagValue::Enum("chime".into())
        );
    }

    #[tokio::test]
    async fn test_persisted_document_tracks_version() {
        let backend = Arc::new(MemoryFlagBackend::new());
        let store = store_over(backend.clone());
        store
            .register_flag(FeatureFlag::bool("a", "desc", false), FlagPermission::ReadWrite, "m")
            .await
            .unwrap();
        store.set_value("a", FlagValue::Bool(true), "other").await.unwrap();

        let saved = backend.saved().unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(saved.flags["a"].value, FlagValue::Bool(true));
        assert_eq!(saved.flags["a"].modified_by.as_deref(), Some("other"));
        assert_eq!(saved.flags["a"].description.as_deref(), Some("desc"));
    }
}
