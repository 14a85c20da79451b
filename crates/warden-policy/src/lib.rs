//! # warden-policy
//!
//! Role hierarchy and permission resolution for Warden.
//!
//! Everything in this crate is pure: no storage, no clock, no I/O. The
//! [`PermissionEngine`] decides whether a [`StaffProfile`] may run a
//! [`CommandDescriptor`] and returns Allow or Deny with a reason.
//!
//! ## Key invariants
//!
//! - **Default deny**: a role with no granted permissions grants nothing.
//!   Holding a role is necessary but never sufficient.
//! - **Super Admin first**: the configured super admin is allowed before any
//!   other check and outranks every role, `Dev` included.
//! - **Dev bypass**: holders of `Dev` skip granular grants entirely.
//! - **Legacy denials win**: a command listed in `denied_commands` is denied
//!   even when a grant would allow it.
//! - **Dev implies Manager**: a profile holding `Dev` always holds `Manager`.

pub mod command;
pub mod engine;
pub mod error;
pub mod history;
pub mod profile;
pub mod role;

pub use command::{CommandDescriptor, CommandFamily, CommandRegistry};
pub use engine::{Decision, DenyReason, EvaluationStep, EvaluationTrace, PermissionEngine};
pub use error::PolicyError;
pub use history::{DecisionHistory, DenialRecord};
pub use profile::{RolePermissionKey, StaffProfile};
pub use role::{Authority, Rank, Role};
