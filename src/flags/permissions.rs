//! Permission model for flag access
//!
//! The owner may always read and write its own flags. Other requesters are
//! governed by the flag's `FlagPermission`.

use tracing::{debug, warn};

use super::error::FlagError;
use super::types::{FlagEntry, FlagPermission};

/// Kind of access being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    fn verb(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

/// Whether `requester` may perform `access` on a flag with this permission
#[inline]
pub fn is_allowed(permission: FlagPermission, owner: &str, requester: &str, access: Access) -> bool {
    if requester == owner {
        return true;
    }
    match (permission, access) {
        (FlagPermission::OwnerOnly, _) => false,
        (FlagPermission::ReadOnly, Access::Read) => true,
        (FlagPermission::ReadOnly, Access::Write) => false,
        (FlagPermission::ReadWrite, _) => true,
    }
}

/// Check access to an entry, producing `PermissionDenied` on refusal
pub fn check_access(entry: &FlagEntry, requester: &str, access: Access) -> Result<(), FlagError> {
    if !is_allowed(entry.permission, &entry.owner, requester, access) {
        warn!(
            "Requester {} denied {} access to flag {} (permission: {}, owner: {})",
            requester,
            access.verb(),
            entry.flag.name,
            entry.permission,
            entry.owner
        );
        return Err(FlagError::PermissionDenied {
            flag: entry.flag.name.clone(),
            requester: requester.to_string(),
            operation: access.verb().to_string(),
        });
    }

    debug!(
        "Requester {} granted {} access to flag {}",
        requester,
        access.verb(),
        entry.flag.name
    );
    Ok(())
}
