//! # warden-staff
//!
//! Staff management and the [`Warden`] service facade.
//!
//! [`StaffManager`] applies every role and permission change under the rank
//! hierarchy and persists it through `warden_store::Store`, which keeps the
//! derived `TEAM` attribute and the audit trail in the same transaction.
//! [`Warden`] adds the command registry, fail-closed authorization and the
//! elevated-group sync on top, configured from `.warden/warden.toml`.

pub mod config;
pub mod elevated;
pub mod error;
pub mod manager;
pub mod service;

pub use config::{BackendKind, WardenConfig};
pub use elevated::{ElevatedGroupSource, StaticElevatedGroup};
pub use error::StaffError;
pub use manager::{StaffManager, SyncReport};
pub use service::Warden;
