//! Durable flag storage
//!
//! The persisted document is shared by every host process on the machine:
//!
//! ```json
//! { "format_version": 1, "version": 12,
//!   "flags": { "sub_alert_enabled": { "value": {"type": "bool", "value": true},
//!              "type": {"kind": "bool"}, "permission": "read_write",
//!              "owner": "alerts", "updated_at": 1700000000000,
//!              "modified_by": "mod_other", "description": "..." } } }
//! ```
//!
//! `version` increments on every committed write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use super::error::{FlagError, FlagResult};
use super::types::{FlagPermission, FlagType, FlagValue};
use crate::utils::write_atomic;

/// Current on-disk format
pub const FLAG_FILE_FORMAT_VERSION: u32 = 1;

/// One persisted flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFlag {
    pub value: FlagValue,
    /// Declared type; absent in hand-written files, inferred from the value
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<FlagType>,
    pub permission: FlagPermission,
    pub owner: String,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub modified_by: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Versioned snapshot of every flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagFile {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub flags: BTreeMap<String, PersistedFlag>,
}

fn default_format_version() -> u32 {
    FLAG_FILE_FORMAT_VERSION
}

impl Default for FlagFile {
    fn default() -> Self {
        Self {
            format_version: FLAG_FILE_FORMAT_VERSION,
            version: 0,
            flags: BTreeMap::new(),
        }
    }
}

impl FlagFile {
    /// Parse a document, mapping every failure to `ConfigCorruption`
    pub fn parse(content: &str) -> FlagResult<Self> {
        let file: FlagFile = serde_json::from_str(content)
            .map_err(|e| FlagError::ConfigCorruption(e.to_string()))?;
        if file.format_version > FLAG_FILE_FORMAT_VERSION {
            return Err(FlagError::ConfigCorruption(format!(
                "unsupported format_version {}",
                file.format_version
            )));
        }
        for (name, flag) in &file.flags {
            if let Some(ty) = &flag.value_type {
                if !ty.accepts(&flag.value) {
                    return Err(FlagError::ConfigCorruption(format!(
                        "flag {} holds a {} value but is declared {}",
                        name,
                        flag.value.kind(),
                        ty
                    )));
                }
            }
        }
        Ok(file)
    }
}

/// A loaded document plus the file's modification time, if known
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub file: FlagFile,
    pub modified: Option<SystemTime>,
}

/// Storage for the flag document
pub trait FlagBackend: Send + Sync {
    /// Load the current document; `Ok(None)` when nothing has been persisted
    fn load(&self) -> FlagResult<Option<LoadedSnapshot>>;

    /// Durably replace the document
    fn save(&self, file: &FlagFile) -> FlagResult<()>;

    /// Path of the backing file, if the backend is file based
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// JSON file backend with atomic replace
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl FlagBackend for JsonFileBackend {
    fn load(&self) -> FlagResult<Option<LoadedSnapshot>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(FlagError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        let file = FlagFile::parse(&content)?;
        Ok(Some(LoadedSnapshot { file, modified }))
    }

    fn save(&self, file: &FlagFile) -> FlagResult<()> {
        let content = serde_json::to_vec_pretty(file)
            .map_err(|e| FlagError::Persistence(e.to_string()))?;
        write_atomic(&self.path, &content).map_err(|e| {
            FlagError::Persistence(format!("failed to write {}: {}", self.path.display(), e))
        })
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Ephemeral backend for tests and embedding without a data directory
#[derive(Default)]
pub struct MemoryFlagBackend {
    file: Mutex<Option<FlagFile>>,
}

impl MemoryFlagBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-seeded with a document, as if another process wrote it
    pub fn with_file(file: FlagFile) -> Self {
        Self {
            file: Mutex::new(Some(file)),
        }
    }

    /// Copy of the last saved document
    pub fn saved(&self) -> Option<FlagFile> {
        self.file.lock().ok().and_then(|guard| guard.clone())
    }
}

impl FlagBackend for MemoryFlagBackend {
    fn load(&self) -> FlagResult<Option<LoadedSnapshot>> {
        let guard = self
            .file
            .lock()
            .map_err(|_| FlagError::Persistence("memory backend poisoned".to_string()))?;
        Ok(guard.clone().map(|file| LoadedSnapshot {
            file,
            modified: None,
        }))
    }

    fn save(&self, file: &FlagFile) -> FlagResult<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| FlagError::Persistence("memory backend poisoned".to_string()))?;
        *guard = Some(file.clone());
        Ok(())
    }
}
