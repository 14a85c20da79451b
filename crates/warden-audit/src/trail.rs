// trail.rs - The AuditTrail trait.
//
// The trail is a pure sink/query surface with no update or delete method:
// implementations may only grow.

use chrono::{DateTime, Utc};

use crate::record::{AuditRecord, EntityRef, NewAuditRecord};

/// Append-only audit trail.
///
/// Implementations must assign strictly increasing `sequence_id`s and keep
/// exactly one record per `append` call.
pub trait AuditTrail {
    /// Error type of the underlying storage.
    type Error;

    /// Append one record and return it with its sequence number.
    fn append(&self, record: NewAuditRecord) -> Result<AuditRecord, Self::Error>;

    /// Records for one entity, newest first, at most `limit` when given.
    fn query_by_entity(
        &self,
        entity: EntityRef,
        limit: Option<usize>,
    ) -> Result<Vec<AuditRecord>, Self::Error>;

    /// Records with `from <= recorded_at <= to`, oldest first.
    fn query_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, Self::Error>;
}
