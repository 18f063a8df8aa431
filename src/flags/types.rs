//! Feature flag data model
//!
//! Flags are typed, named values declared by an owning module. The store holds
//! one `FlagEntry` per flag; everything else in this file is plain data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who besides the owner may touch a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagPermission {
    /// Only the owner may read or write
    OwnerOnly,
    /// Everyone may read, only the owner may write
    ReadOnly,
    /// Everyone may read and write
    ReadWrite,
}

impl fmt::Display for FlagPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagPermission::OwnerOnly => write!(f, "owner_only"),
            FlagPermission::ReadOnly => write!(f, "read_only"),
            FlagPermission::ReadWrite => write!(f, "read_write"),
        }
    }
}

/// A typed flag value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    String(String),
    Enum(String),
}

impl FlagValue {
    /// Short name of the value's kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            FlagValue::Bool(_) => "bool",
            FlagValue::Int(_) => "int",
            FlagValue::String(_) => "string",
            FlagValue::Enum(_) => "enum",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String content of a string or enum value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) | FlagValue::Enum(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Bool(b) => write!(f, "{}", b),
            FlagValue::Int(i) => write!(f, "{}", i),
            FlagValue::String(s) | FlagValue::Enum(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Int(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

/// Declared type of a flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagType {
    Bool,
    Int,
    String,
    Enum { variants: Vec<String> },
}

impl FlagType {
    /// Whether `value` is a legal value of this type
    pub fn accepts(&self, value: &FlagValue) -> bool {
        match (self, value) {
            (FlagType::Bool, FlagValue::Bool(_)) => true,
            (FlagType::Int, FlagValue::Int(_)) => true,
            (FlagType::String, FlagValue::String(_)) => true,
            (FlagType::Enum { variants }, FlagValue::Enum(v)) => variants.iter().any(|x| x == v),
            _ => false,
        }
    }

    /// Best-effort type of a value read without a type annotation
    pub fn infer(value: &FlagValue) -> FlagType {
        match value {
            FlagValue::Bool(_) => FlagType::Bool,
            FlagValue::Int(_) => FlagType::Int,
            FlagValue::String(_) => FlagType::String,
            FlagValue::Enum(v) => FlagType::Enum {
                variants: vec![v.clone()],
            },
        }
    }

    /// Parse textual input (CLI, env) into a value of this type
    pub fn parse_value(&self, input: &str) -> Option<FlagValue> {
        let input = input.trim();
        match self {
            FlagType::Bool => match input.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Some(FlagValue::Bool(true)),
                "false" | "off" | "no" | "0" => Some(FlagValue::Bool(false)),
                _ => None,
            },
            FlagType::Int => input.parse::<i64>().ok().map(FlagValue::Int),
            FlagType::String => Some(FlagValue::String(input.to_string())),
            FlagType::Enum { variants } => variants
                .iter()
                .find(|v| v.as_str() == input)
                .map(|v| FlagValue::Enum(v.clone())),
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagType::Bool => write!(f, "bool"),
            FlagType::Int => write!(f, "int"),
            FlagType::String => write!(f, "string"),
            FlagType::Enum { variants } => write!(f, "enum[{}]", variants.join("|")),
        }
    }
}

/// Immutable flag declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
    pub description: String,
    pub value_type: FlagType,
    pub default_value: FlagValue,
}

impl FeatureFlag {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        value_type: FlagType,
        default_value: FlagValue,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            value_type,
            default_value,
        }
    }

    pub fn bool(name: impl Into<String>, description: impl Into<String>, default: bool) -> Self {
        Self::new(name, description, FlagType::Bool, FlagValue::Bool(default))
    }

    pub fn int(name: impl Into<String>, description: impl Into<String>, default: i64) -> Self {
        Self::new(name, description, FlagType::Int, FlagValue::Int(default))
    }

    pub fn string(
        name: impl Into<String>,
        description: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            description,
            FlagType::String,
            FlagValue::String(default.into()),
        )
    }

    pub fn enumeration(
        name: impl Into<String>,
        description: impl Into<String>,
        variants: &[&str],
        default: &str,
    ) -> Self {
        Self::new(
            name,
            description,
            FlagType::Enum {
                variants: variants.iter().map(|v| v.to_string()).collect(),
            },
            FlagValue::Enum(default.to_string()),
        )
    }

    /// Whether the default value is legal for the declared type
    pub fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && self.value_type.accepts(&self.default_value)
    }
}

/// A flag plus the permission it is registered with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDeclaration {
    pub flag: FeatureFlag,
    pub permission: FlagPermission,
}

impl FlagDeclaration {
    pub fn new(flag: FeatureFlag, permission: FlagPermission) -> Self {
        Self { flag, permission }
    }
}

/// Current state of one flag in the store
#[derive(Debug, Clone, PartialEq)]
pub struct FlagEntry {
    pub flag: FeatureFlag,
    pub owner: String,
    pub permission: FlagPermission,
    pub value: FlagValue,
    pub last_modified_by: String,
    /// Milliseconds since the Unix epoch
    pub last_modified_at: u64,
    /// False for entries loaded from disk whose owner has not registered yet
    pub declared: bool,
}

/// Where a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// Committed through `set_value` in this process
    Local,
    /// Picked up from the persisted file written by another process
    External,
}

/// Change notification delivered to observers
#[derive(Debug, Clone, PartialEq)]
pub struct FlagChange {
    pub name: String,
    pub old_value: FlagValue,
    pub new_value: FlagValue,
    pub modified_by: String,
    pub origin: ChangeOrigin,
}
