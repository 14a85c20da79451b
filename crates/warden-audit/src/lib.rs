//! # warden-audit
//!
//! Audit trail primitives for Warden.
//!
//! Every attribute mutation and every staff profile change is recorded as an
//! [`AuditRecord`]. Records are immutable once appended: the [`AuditTrail`]
//! trait exposes append and query operations only, never update or delete.
//!
//! The storage backends in `warden-store` implement [`AuditTrail`] and append
//! records inside the same transaction as the mutation they describe. The
//! [`AuditLog`] type is an offline export format: a JSONL file whose lines
//! are linked by a SHA-256 hash chain so tampering can be detected.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use warden_audit::{AuditLog, AuditRecord, EntityRef};
//!
//! let mut log = AuditLog::open("/tmp/warden-audit.jsonl").unwrap();
//! let record = AuditRecord {
//!     sequence_id: 1,
//!     entity: EntityRef::user(42),
//!     attribute_name: "BETA".into(),
//!     old_value: None,
//!     new_value: Some(serde_json::Value::Bool(true)),
//!     actor_id: Some(7),
//!     reason: "beta invite".into(),
//!     recorded_at: chrono::Utc::now(),
//! };
//! log.append(&record).unwrap();
//! ```

pub mod error;
pub mod log;
pub mod record;
pub mod trail;

pub use error::AuditError;
pub use log::{AuditLog, ChainedRecord};
pub use record::{AuditRecord, EntityKind, EntityRef, NewAuditRecord};
pub use trail::AuditTrail;
