// backend/memory.rs - In-process storage backend.
//
// All state sits behind one mutex, so every commit is trivially atomic.
// An availability switch lets tests simulate an unreachable store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use warden_audit::{AuditRecord, AuditTrail, EntityKind, EntityRef, NewAuditRecord};
use warden_policy::StaffProfile;

use super::{conflict, AttributeChange, ProfileCommit, StorageBackend};
use crate::error::StoreError;
use crate::value::{AttributeValue, Entity};

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<EntityRef, Entity>,
    /// `(kind, name) -> entity id -> value`.
    index: HashMap<(EntityKind, String), BTreeMap<u64, AttributeValue>>,
    audit: Vec<AuditRecord>,
    profiles: BTreeMap<u64, StaffProfile>,
}

impl MemoryState {
    fn entity_mut(&mut self, key: EntityRef, now: DateTime<Utc>) -> &mut Entity {
        self.entities
            .entry(key)
            .or_insert_with(|| Entity::new(key, now))
    }

    fn set_attribute(
        &mut self,
        key: EntityRef,
        name: &str,
        value: Option<AttributeValue>,
        now: DateTime<Utc>,
    ) {
        let entity = self.entity_mut(key, now);
        entity.apply(name, value.clone());
        entity.version += 1;
        entity.updated_at = now;

        let slot = self.index.entry((key.kind, name.to_string())).or_default();
        match value {
            Some(value) => {
                slot.insert(key.id, value);
            }
            None => {
                slot.remove(&key.id);
            }
        }
    }

    fn append(&mut self, record: NewAuditRecord) -> AuditRecord {
        let sequence_id = self.audit.len() as u64 + 1;
        let record = record.into_record(sequence_id);
        self.audit.push(record.clone());
        record
    }
}

#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    available: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the store. While unavailable every
    /// operation fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "in-memory store switched off".to_string(),
            });
        }
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTrail for MemoryBackend {
    type Error = StoreError;

    fn append(&self, record: NewAuditRecord) -> Result<AuditRecord, StoreError> {
        Ok(self.state()?.append(record))
    }

    fn query_by_entity(
        &self,
        entity: EntityRef,
        limit: Option<usize>,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let state = self.state()?;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|record| record.entity == entity)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn query_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let state = self.state()?;
        Ok(state
            .audit
            .iter()
            .filter(|record| record.recorded_at >= from && record.recorded_at <= to)
            .cloned()
            .collect())
    }
}

impl StorageBackend for MemoryBackend {
    fn ping(&self) -> Result<(), StoreError> {
        self.state().map(|_| ())
    }

    fn load_or_create_entity(&self, key: EntityRef, now: DateTime<Utc>) -> Result<Entity, StoreError> {
        let mut state = self.state()?;
        Ok(state.entity_mut(key, now).clone())
    }

    fn commit_attribute(
        &self,
        key: EntityRef,
        expected_version: u64,
        change: &AttributeChange,
        now: DateTime<Utc>,
    ) -> Result<AuditRecord, StoreError> {
        let mut state = self.state()?;
        let entity = state.entity_mut(key, now);
        if entity.version != expected_version {
            return Err(conflict(key));
        }
        let old = entity.get(&change.name).cloned();

        state.set_attribute(key, &change.name, change.value.clone(), now);
        Ok(state.append(NewAuditRecord {
            entity: key,
            attribute_name: change.name.clone(),
            old_value: old.as_ref().map(AttributeValue::to_json),
            new_value: change.value.as_ref().map(AttributeValue::to_json),
            actor_id: change.actor_id,
            reason: change.reason.clone(),
            recorded_at: now,
        }))
    }

    fn write_entity_data(
        &self,
        key: EntityRef,
        data: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let entity = state.entity_mut(key, now);
        entity.data = data.clone();
        entity.version += 1;
        entity.updated_at = now;
        Ok(())
    }

    fn entities_with(
        &self,
        kind: EntityKind,
        name: &str,
        value: Option<&AttributeValue>,
    ) -> Result<BTreeSet<u64>, StoreError> {
        let state = self.state()?;
        let Some(slot) = state.index.get(&(kind, name.to_string())) else {
            return Ok(BTreeSet::new());
        };
        Ok(slot
            .iter()
            .filter(|(_, stored)| value.map_or(true, |wanted| *stored == wanted))
            .map(|(id, _)| *id)
            .collect())
    }

    fn load_profile(&self, user_id: u64) -> Result<Option<StaffProfile>, StoreError> {
        Ok(self.state()?.profiles.get(&user_id).cloned())
    }

    fn list_profiles(&self) -> Result<Vec<StaffProfile>, StoreError> {
        Ok(self.state()?.profiles.values().cloned().collect())
    }

    fn commit_profile(&self, commit: &ProfileCommit) -> Result<Vec<AuditRecord>, StoreError> {
        let mut state = self.state()?;
        let user_id = commit.profile.user_id;
        let stored_version = state.profiles.get(&user_id).map_or(0, |p| p.version);
        if stored_version != commit.expected_version {
            return Err(conflict(format!("staff profile {}", user_id)));
        }

        let mut profile = commit.profile.clone();
        profile.version = commit.expected_version + 1;
        state.profiles.insert(user_id, profile);

        let mut records: Vec<AuditRecord> = commit
            .audit
            .iter()
            .cloned()
            .map(|record| state.append(record))
            .collect();

        let key = EntityRef::user(user_id);
        for projection in &commit.projections {
            let old = state
                .entity_mut(key, commit.committed_at)
                .get(&projection.name)
                .cloned();
            if old == projection.value {
                continue;
            }
            state.set_attribute(key, &projection.name, projection.value.clone(), commit.committed_at);
            let record = commit.projection_record(key, projection, old.as_ref());
            records.push(state.append(record));
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(name: &str, value: Option<AttributeValue>) -> AttributeChange {
        AttributeChange {
            name: name.to_string(),
            value,
            actor_id: Some(7),
            reason: "test".to_string(),
        }
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let backend = MemoryBackend::new();
        let key = EntityRef::user(1);
        let now = Utc::now();
        let entity = backend.load_or_create_entity(key, now).unwrap();
        backend
            .commit_attribute(key, entity.version, &change("BETA", Some(AttributeValue::Flag)), now)
            .unwrap();
        let err = backend
            .commit_attribute(key, entity.version, &change("BETA", None), now)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(backend.query_by_entity(key, None).unwrap().len(), 1);
    }

    #[test]
    fn unavailable_backend_refuses_everything() {
        let backend = MemoryBackend::new();
        backend.set_available(false);
        assert!(backend.ping().unwrap_err().is_unavailable());
        assert!(backend.load_profile(1).unwrap_err().is_unavailable());
        backend.set_available(true);
        assert!(backend.ping().is_ok());
    }

    #[test]
    fn index_tracks_removals() {
        let backend = MemoryBackend::new();
        let key = EntityRef::guild(3);
        let now = Utc::now();
        backend
            .commit_attribute(key, 0, &change("PREMIUM", Some(AttributeValue::Flag)), now)
            .unwrap();
        assert_eq!(
            backend.entities_with(EntityKind::Guild, "PREMIUM", None).unwrap(),
            BTreeSet::from([3])
        );
        backend
            .commit_attribute(key, 1, &change("PREMIUM", None), now)
            .unwrap();
        assert!(backend
            .entities_with(EntityKind::Guild, "PREMIUM", None)
            .unwrap()
            .is_empty());
    }
}
