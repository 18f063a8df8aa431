//! Feature flag error types

use thiserror::Error;

/// Errors raised by the flag store, its backend and the config watcher
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlagError {
    #[error("Flag already registered: {name} (owner: {owner})")]
    DuplicateFlag { name: String, owner: String },

    #[error("Flag not found: {0}")]
    FlagNotFound(String),

    #[error("Permission denied: {requester} may not {operation} flag {flag}")]
    PermissionDenied {
        flag: String,
        requester: String,
        operation: String,
    },

    #[error("Type mismatch for flag {flag}: expected {expected}, got {actual}")]
    TypeMismatch {
        flag: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid flag declaration: {0}")]
    InvalidDeclaration(String),

    #[error("Flag persistence failed: {0}")]
    Persistence(String),

    #[error("Flag file is corrupt: {0}")]
    ConfigCorruption(String),
}

pub type FlagResult<T> = Result<T, FlagError>;
