// backend/mod.rs - The storage backend trait and its commit payloads.
//
// A backend owns entity rows, the attribute index, staff profile rows and
// the audit trail. Each `commit_*` call is one transaction: the row change,
// its index update and its audit records are applied together or not at
// all. Commits carry the version they were computed from, and a backend
// refuses a commit whose base version is no longer current.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use warden_audit::{AuditRecord, AuditTrail, EntityKind, EntityRef, NewAuditRecord};
use warden_policy::StaffProfile;

use crate::error::StoreError;
use crate::value::{AttributeValue, Entity};

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// One attribute mutation. `value: None` removes the attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    /// Already normalised (upper case).
    pub name: String,
    pub value: Option<AttributeValue>,
    pub actor_id: Option<u64>,
    pub reason: String,
}

/// An attribute on the profile owner's user entity that mirrors profile
/// state. Applied, and audited, only when it differs from the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeProjection {
    pub name: String,
    pub value: Option<AttributeValue>,
}

/// A staff profile write plus everything that must land with it.
#[derive(Debug, Clone)]
pub struct ProfileCommit {
    /// The new profile state. Its `version` is ignored; the backend stores
    /// `expected_version + 1`.
    pub profile: StaffProfile,
    /// Version the change was computed from (0 for a profile never stored).
    pub expected_version: u64,
    /// Audit records describing the profile change itself.
    pub audit: Vec<NewAuditRecord>,
    pub projections: Vec<AttributeProjection>,
    pub actor_id: Option<u64>,
    pub reason: String,
    pub committed_at: DateTime<Utc>,
}

impl ProfileCommit {
    pub(crate) fn projection_record(
        &self,
        entity: EntityRef,
        projection: &AttributeProjection,
        old: Option<&AttributeValue>,
    ) -> NewAuditRecord {
        NewAuditRecord {
            entity,
            attribute_name: projection.name.clone(),
            old_value: old.map(AttributeValue::to_json),
            new_value: projection.value.as_ref().map(AttributeValue::to_json),
            actor_id: self.actor_id,
            reason: self.reason.clone(),
            recorded_at: self.committed_at,
        }
    }
}

/// Persistence for entities, staff profiles and the audit trail.
pub trait StorageBackend: AuditTrail<Error = StoreError> + Send + Sync {
    /// Cheap connectivity check.
    fn ping(&self) -> Result<(), StoreError>;

    /// Read an entity, creating an empty row on first access.
    fn load_or_create_entity(&self, key: EntityRef, now: DateTime<Utc>) -> Result<Entity, StoreError>;

    /// Apply one attribute change and append exactly one audit record.
    fn commit_attribute(
        &self,
        key: EntityRef,
        expected_version: u64,
        change: &AttributeChange,
        now: DateTime<Utc>,
    ) -> Result<AuditRecord, StoreError>;

    /// Replace the opaque data blob. Not audited.
    fn write_entity_data(
        &self,
        key: EntityRef,
        data: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Ids of entities of `kind` holding `name` (any value when `value` is
    /// `None`, that exact value otherwise). Served from the attribute index.
    fn entities_with(
        &self,
        kind: EntityKind,
        name: &str,
        value: Option<&AttributeValue>,
    ) -> Result<BTreeSet<u64>, StoreError>;

    fn load_profile(&self, user_id: u64) -> Result<Option<StaffProfile>, StoreError>;

    /// Every stored profile, ordered by user id.
    fn list_profiles(&self) -> Result<Vec<StaffProfile>, StoreError>;

    /// Write a profile, its audit records and its projections atomically.
    /// Returns every appended record in sequence order.
    fn commit_profile(&self, commit: &ProfileCommit) -> Result<Vec<AuditRecord>, StoreError>;
}

pub(crate) fn conflict(target: impl std::fmt::Display) -> StoreError {
    StoreError::Conflict {
        target: target.to_string(),
    }
}
