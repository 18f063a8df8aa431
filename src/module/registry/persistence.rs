//! Persisted registry state
//!
//! A JSON map from module name to `{enabled, auto_start, state, last_error,
//! start_count}`. The file may be shared by several host processes, so a
//! save merges into what is on disk and keeps entries for modules this
//! process does not know.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::module::traits::{ModuleError, ModuleState};
use crate::utils::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedModuleState {
    pub enabled: bool,
    pub auto_start: bool,
    pub state: ModuleState,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub start_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStateFile {
    #[serde(default)]
    pub modules: BTreeMap<String, PersistedModuleState>,
}

impl RegistryStateFile {
    /// Load the state file; a missing file is empty state
    pub fn load(path: &Path) -> Result<Self, ModuleError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ModuleError::Persistence(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            ModuleError::Persistence(format!("malformed {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ModuleError> {
        let content = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &content).map_err(|e| {
            ModuleError::Persistence(format!("failed to write {}: {}", path.display(), e))
        })
    }

    /// Overwrite `entries` in the on-disk document and save it
    ///
    /// An unreadable existing document is replaced rather than blocking the save.
    pub fn merge_and_save(
        path: &Path,
        entries: impl IntoIterator<Item = (String, PersistedModuleState)>,
    ) -> Result<(), ModuleError> {
        let mut file = match Self::load(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Replacing unreadable registry state: {}", e);
                Self::default()
            }
        };
        file.modules.extend(entries);
        file.save(path)
    }
}
