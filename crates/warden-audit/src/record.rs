// record.rs - Entity addressing and the audit record data model.
//
// An audit record describes one mutation of one named attribute on one
// entity: the value before, the value after, who did it and why. Values
// are kept as raw JSON so the trail can describe both scalar attributes
// and staff profile documents without knowing their types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two kinds of entity that carry attributes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Guild,
}

impl EntityKind {
    /// Stable lowercase name, used as the storage discriminator.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Guild => "guild",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(EntityKind::User),
            "guild" => Ok(EntityKind::Guild),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// Identity of an entity: `(kind, id)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: u64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn user(id: u64) -> Self {
        Self::new(EntityKind::User, id)
    }

    pub fn guild(id: u64) -> Self {
        Self::new(EntityKind::Guild, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A record that has not been assigned a sequence number yet.
///
/// Backends turn this into an [`AuditRecord`] when they append it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRecord {
    pub entity: EntityRef,
    pub attribute_name: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub actor_id: Option<u64>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl NewAuditRecord {
    /// Attach the sequence number allocated by the trail.
    pub fn into_record(self, sequence_id: u64) -> AuditRecord {
        AuditRecord {
            sequence_id,
            entity: self.entity,
            attribute_name: self.attribute_name,
            old_value: self.old_value,
            new_value: self.new_value,
            actor_id: self.actor_id,
            reason: self.reason,
            recorded_at: self.recorded_at,
        }
    }
}

/// One immutable entry of the audit trail.
///
/// `old_value` / `new_value` are `None` when the attribute was absent before
/// or after the mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// Strictly increasing position in the trail.
    pub sequence_id: u64,
    pub entity: EntityRef,
    pub attribute_name: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    /// The acting user, or `None` for system-initiated changes.
    pub actor_id: Option<u64>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// True when the mutation did not change the value (idempotent set).
    pub fn is_noop(&self) -> bool {
        self.old_value == self.new_value
    }
}
