// error.rs - Error types for the policy subsystem.

use thiserror::Error;

use crate::role::Role;

/// Errors raised while parsing policy inputs or mutating a profile.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The role name is not one of the fixed staff roles.
    #[error("unknown staff role '{0}'")]
    UnknownRole(String),

    /// The command prefix does not name a command family.
    #[error("unknown command family prefix '{0}'")]
    UnknownFamily(String),

    /// No registered command matches the identifier.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The role cannot be removed while another held role depends on it.
    #[error("role {role} cannot be removed while {required_by} is held")]
    RoleDependency { role: Role, required_by: Role },
}
