// error.rs - Error types for staff management and the service facade.

use std::path::PathBuf;

use thiserror::Error;
use warden_policy::{DenyReason, PolicyError, Role};
use warden_store::StoreError;

#[derive(Debug, Error)]
pub enum StaffError {
    /// A hierarchy or grant check failed. Never retried.
    #[error("actor {actor} denied ({reason}): {detail}")]
    PermissionDenied {
        actor: u64,
        reason: DenyReason,
        detail: String,
    },

    /// The target is a synced elevated-group member and the role is one
    /// the sync maintains.
    #[error("role {role} of user {target} is maintained by the elevated group sync")]
    ProtectedRole { target: u64, role: Role },

    #[error("role {role} cannot be removed while {required_by} is held")]
    RoleDependency { role: Role, required_by: Role },

    #[error("user {target} does not hold role {role}")]
    RoleNotHeld { target: u64, role: Role },

    #[error("user {target} is not staff")]
    NotStaff { target: u64 },

    #[error("unknown staff role '{0}'")]
    UnknownRole(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The attribute is derived and only the staff manager may write it.
    #[error("attribute {name} is maintained by staff management")]
    ReservedAttribute { name: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl StaffError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StaffError::Store(err) if err.is_unavailable())
    }

    pub(crate) fn denied(actor: u64, detail: impl Into<String>) -> Self {
        StaffError::PermissionDenied {
            actor,
            reason: DenyReason::InsufficientPermission,
            detail: detail.into(),
        }
    }
}

impl From<PolicyError> for StaffError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::UnknownRole(name) => StaffError::UnknownRole(name),
            PolicyError::RoleDependency { role, required_by } => {
                StaffError::RoleDependency { role, required_by }
            }
            PolicyError::UnknownFamily(id) | PolicyError::UnknownCommand(id) => {
                StaffError::UnknownCommand(id)
            }
        }
    }
}
