// store.rs - The Store facade: attribute operations, staff profile
// persistence and the two read-through caches.
//
// Write path (per identity, under a keyed lock):
//   read fresh row -> compute change -> backend commit (row + index + audit
//   in one transaction) -> invalidate cache -> return
//
// A commit that loses an optimistic-version race is retried once with a
// fresh read, then surfaced as `StoreError::Conflict`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use warden_audit::{AuditRecord, EntityKind, EntityRef, NewAuditRecord};
use warden_policy::{RolePermissionKey, StaffProfile};

use crate::backend::{AttributeChange, AttributeProjection, ProfileCommit, StorageBackend};
use crate::cache::{CacheStats, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::locks::KeyedLocks;
use crate::value::{normalize_name, AttributeInput, AttributeValue, Entity, TEAM};

/// Upper bound for the staff profile TTL.
pub const MAX_PROFILE_TTL_SECS: u64 = 60;

// Longest TTL accepted for entity snapshots (one year).
const MAX_ENTITY_TTL_SECS: u64 = 365 * 24 * 3600;

/// Cache sizing and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub entity_ttl_secs: u64,
    /// Clamped to `MAX_PROFILE_TTL_SECS`.
    pub profile_ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            entity_ttl_secs: 300,
            profile_ttl_secs: 30,
            capacity: 10_000,
        }
    }
}

/// Result of `Store::update_profile`.
#[derive(Debug, Clone)]
pub struct ProfileUpdate<T> {
    /// The profile as stored after the call.
    pub profile: StaffProfile,
    /// Records appended by the commit; empty when nothing changed.
    pub records: Vec<AuditRecord>,
    /// Whatever the mutation closure returned.
    pub outcome: T,
}

impl<T> ProfileUpdate<T> {
    pub fn changed(&self) -> bool {
        !self.records.is_empty()
    }
}

pub struct Store {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    entities: Mutex<TtlCache<EntityRef, Entity>>,
    profiles: Mutex<TtlCache<u64, StaffProfile>>,
    entity_locks: KeyedLocks<EntityRef>,
    profile_locks: KeyedLocks<u64>,
}

impl Store {
    pub fn new(backend: Arc<dyn StorageBackend>, options: CacheOptions) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock), options)
    }

    pub fn with_clock(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>, options: CacheOptions) -> Self {
        let entity_ttl = options.entity_ttl_secs.min(MAX_ENTITY_TTL_SECS);
        let profile_ttl = options.profile_ttl_secs.min(MAX_PROFILE_TTL_SECS);
        Self {
            backend,
            clock,
            entities: Mutex::new(TtlCache::new(options.capacity, Duration::seconds(entity_ttl as i64))),
            profiles: Mutex::new(TtlCache::new(options.capacity, Duration::seconds(profile_ttl as i64))),
            entity_locks: KeyedLocks::new(),
            profile_locks: KeyedLocks::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fails with `Unavailable` when the backing store cannot be reached.
    pub fn check_available(&self) -> Result<(), StoreError> {
        self.backend.ping()
    }

    // ── Attributes ──────────────────────────────────────────────

    /// Full snapshot of an entity, creating the row on first access.
    pub fn get_entity(&self, key: EntityRef) -> Result<Entity, StoreError> {
        let now = self.now();
        let epoch = {
            let mut cache = self.entity_cache();
            if let Some(hit) = cache.get(&key, now) {
                tracing::debug!(entity = %key, "entity cache hit");
                return Ok(hit);
            }
            cache.epoch()
        };

        let entity = self.backend.load_or_create_entity(key, now)?;
        self.entity_cache()
            .insert_if_current(key, entity.clone(), now, epoch);
        Ok(entity)
    }

    pub fn get_attribute(&self, key: EntityRef, name: &str) -> Result<Option<AttributeValue>, StoreError> {
        let name = attribute_name(name)?;
        Ok(self.get_entity(key)?.get(&name).cloned())
    }

    pub fn has_attribute(&self, key: EntityRef, name: &str) -> Result<bool, StoreError> {
        let name = attribute_name(name)?;
        Ok(self.get_entity(key)?.has(&name))
    }

    /// Set, replace or remove one attribute and append exactly one audit
    /// record, even when the value does not change.
    pub fn set_attribute(
        &self,
        key: EntityRef,
        name: &str,
        value: impl Into<AttributeInput>,
        actor_id: Option<u64>,
        reason: &str,
    ) -> Result<AuditRecord, StoreError> {
        let change = AttributeChange {
            name: attribute_name(name)?,
            value: value.into().normalize(),
            actor_id,
            reason: reason.to_string(),
        };

        let record = self.entity_locks.with_lock(&key, || {
            retry_on_conflict(&key.to_string(), || {
                let now = self.now();
                let current = self.backend.load_or_create_entity(key, now)?;
                self.backend
                    .commit_attribute(key, current.version, &change, now)
            })
        });
        // Invalidate even on failure: a conflict means the cached row is stale.
        self.entity_cache().invalidate(&key);
        let record = record?;

        tracing::info!(
            entity = %key,
            attribute = %record.attribute_name,
            actor = ?actor_id,
            sequence_id = record.sequence_id,
            "attribute updated"
        );
        Ok(record)
    }

    /// Ids of entities holding `name` (any value), or holding exactly
    /// `value` when given.
    pub fn list_entities_with(
        &self,
        kind: EntityKind,
        name: &str,
        value: Option<&AttributeValue>,
    ) -> Result<BTreeSet<u64>, StoreError> {
        let name = attribute_name(name)?;
        self.backend.entities_with(kind, &name, value)
    }

    /// Replace the opaque data blob of an entity.
    pub fn set_entity_data(&self, key: EntityRef, data: &Value) -> Result<(), StoreError> {
        let result = self
            .entity_locks
            .with_lock(&key, || self.backend.write_entity_data(key, data, self.now()));
        self.entity_cache().invalidate(&key);
        result
    }

    // ── Staff profiles ──────────────────────────────────────────

    /// The staff profile of `user_id`; an empty profile when none is stored.
    pub fn load_profile(&self, user_id: u64) -> Result<StaffProfile, StoreError> {
        let now = self.now();
        let epoch = {
            let mut cache = self.profile_cache();
            if let Some(hit) = cache.get(&user_id, now) {
                tracing::debug!(user = user_id, "profile cache hit");
                return Ok(hit);
            }
            cache.epoch()
        };

        let profile = self
            .backend
            .load_profile(user_id)?
            .unwrap_or_else(|| StaffProfile::new(user_id));
        self.profile_cache()
            .insert_if_current(user_id, profile.clone(), now, epoch);
        Ok(profile)
    }

    /// Every stored profile, bypassing the cache.
    pub fn list_profiles(&self) -> Result<Vec<StaffProfile>, StoreError> {
        self.backend.list_profiles()
    }

    /// Read-modify-write of one staff profile.
    ///
    /// `apply` runs against a fresh copy read from the backend (it may run
    /// twice when a conflict is retried). If it returns `Err` nothing is
    /// written. If it leaves the profile unchanged nothing is written
    /// either. Otherwise the profile, its audit records and the `TEAM`
    /// projection are committed in one transaction, and both caches for the
    /// user are invalidated before this returns.
    pub fn update_profile<T, E, F>(
        &self,
        user_id: u64,
        actor_id: Option<u64>,
        reason: &str,
        mut apply: F,
    ) -> Result<ProfileUpdate<T>, E>
    where
        F: FnMut(&mut StaffProfile) -> Result<T, E>,
        E: From<StoreError>,
    {
        let entity = EntityRef::user(user_id);
        let mut attempt = 0;
        let result = self.profile_locks.with_lock(&user_id, || -> Result<ProfileUpdate<T>, E> {
            loop {
                attempt += 1;
                let before = self
                    .backend
                    .load_profile(user_id)?
                    .unwrap_or_else(|| StaffProfile::new(user_id));
                let mut after = before.clone();
                let outcome = apply(&mut after)?;

                if same_grants(&before, &after) {
                    return Ok(ProfileUpdate {
                        profile: before,
                        records: Vec::new(),
                        outcome,
                    });
                }

                let now = self.now();
                if before.version == 0 {
                    after.created_at = Some(now);
                    after.created_by = actor_id;
                }
                after.updated_at = Some(now);
                after.updated_by = actor_id;

                let commit = ProfileCommit {
                    audit: profile_audit(&before, &after, actor_id, reason, now),
                    projections: vec![AttributeProjection {
                        name: TEAM.to_string(),
                        value: after.is_staff().then_some(AttributeValue::Flag),
                    }],
                    expected_version: before.version,
                    profile: after,
                    actor_id,
                    reason: reason.to_string(),
                    committed_at: now,
                };

                let committed = self.backend.commit_profile(&commit);
                // The commit may have touched the user entity through TEAM.
                self.profile_cache().invalidate(&user_id);
                self.entity_cache().invalidate(&entity);

                match committed {
                    Ok(records) => {
                        let mut profile = commit.profile;
                        profile.version = commit.expected_version + 1;
                        return Ok(ProfileUpdate {
                            profile,
                            records,
                            outcome,
                        });
                    }
                    Err(StoreError::Conflict { target }) if attempt < 2 => {
                        tracing::warn!(user = user_id, %target, "profile write conflicted, retrying");
                    }
                    Err(err) => return Err(E::from(err)),
                }
            }
        });

        if let Ok(update) = &result {
            if update.changed() {
                tracing::info!(
                    user = user_id,
                    actor = ?actor_id,
                    records = update.records.len(),
                    reason,
                    "staff profile updated"
                );
            }
        }
        result
    }

    // ── Audit ───────────────────────────────────────────────────

    /// Records for one entity, newest first.
    pub fn query_audit_trail(&self, key: EntityRef, limit: Option<usize>) -> Result<Vec<AuditRecord>, StoreError> {
        self.backend.query_by_entity(key, limit)
    }

    /// Records in `[from, to]`, oldest first.
    pub fn query_audit_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        self.backend.query_by_time_range(from, to)
    }

    /// (entity cache, profile cache) counters.
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.entity_cache().stats(), self.profile_cache().stats())
    }

    fn entity_cache(&self) -> MutexGuard<'_, TtlCache<EntityRef, Entity>> {
        self.entities.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn profile_cache(&self) -> MutexGuard<'_, TtlCache<u64, StaffProfile>> {
        self.profiles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn attribute_name(name: &str) -> Result<String, StoreError> {
    normalize_name(name).ok_or_else(|| StoreError::InvalidAttribute {
        name: name.to_string(),
        reason: "must be a single non-empty word".to_string(),
    })
}

/// Run `op`, retrying once on `Conflict`.
fn retry_on_conflict<T>(
    target: &str,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    match op() {
        Err(StoreError::Conflict { .. }) => {
            tracing::warn!(%target, "write conflicted, retrying");
            op()
        }
        other => other,
    }
}

fn same_grants(a: &StaffProfile, b: &StaffProfile) -> bool {
    a.roles().eq(b.roles())
        && a.role_permissions() == b.role_permissions()
        && a.denied_commands() == b.denied_commands()
}

fn set_json<'a>(items: impl Iterator<Item = &'a str>) -> Option<Value> {
    let items: Vec<Value> = items.map(|s| Value::String(s.to_string())).collect();
    (!items.is_empty()).then_some(Value::Array(items))
}

/// Audit records describing the difference between two profile states.
fn profile_audit(
    before: &StaffProfile,
    after: &StaffProfile,
    actor_id: Option<u64>,
    reason: &str,
    now: DateTime<Utc>,
) -> Vec<NewAuditRecord> {
    let entity = EntityRef::user(after.user_id);
    let record = |name: String, old: Option<Value>, new: Option<Value>| NewAuditRecord {
        entity,
        attribute_name: name,
        old_value: old,
        new_value: new,
        actor_id,
        reason: reason.to_string(),
        recorded_at: now,
    };

    let mut records = Vec::new();

    if !before.roles().eq(after.roles()) {
        records.push(record(
            "staff.roles".to_string(),
            set_json(before.roles().map(|r| r.as_str())),
            set_json(after.roles().map(|r| r.as_str())),
        ));
    }

    let keys: BTreeSet<RolePermissionKey> = before
        .role_permissions()
        .keys()
        .chain(after.role_permissions().keys())
        .copied()
        .collect();
    let empty = BTreeSet::new();
    for key in keys {
        let old = permissions(before.role_permissions(), key, &empty);
        let new = permissions(after.role_permissions(), key, &empty);
        if old != new {
            records.push(record(
                format!("staff.permissions.{}", key),
                set_json(old.iter().map(String::as_str)),
                set_json(new.iter().map(String::as_str)),
            ));
        }
    }

    if before.denied_commands() != after.denied_commands() {
        records.push(record(
            "staff.denied_commands".to_string(),
            set_json(before.denied_commands().iter().map(String::as_str)),
            set_json(after.denied_commands().iter().map(String::as_str)),
        ));
    }

    records
}

fn permissions<'a>(
    map: &'a BTreeMap<RolePermissionKey, BTreeSet<String>>,
    key: RolePermissionKey,
    empty: &'a BTreeSet<String>,
) -> &'a BTreeSet<String> {
    map.get(&key).unwrap_or(empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use crate::backend::conflict;
    use crate::value::{BETA, LANG};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_audit::AuditTrail;
    use warden_policy::Role;

    /// Memory backend whose next `pending` commits lose the version race.
    struct RacingBackend {
        inner: MemoryBackend,
        pending: AtomicUsize,
    }

    impl RacingBackend {
        fn new(conflicts: usize) -> Self {
            Self {
                inner: MemoryBackend::new(),
                pending: AtomicUsize::new(conflicts),
            }
        }

        fn lose_race(&self, target: impl std::fmt::Display) -> Result<(), StoreError> {
            let lost = self
                .pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                Err(conflict(target))
            } else {
                Ok(())
            }
        }
    }

    impl AuditTrail for RacingBackend {
        type Error = StoreError;

        fn append(&self, record: NewAuditRecord) -> Result<AuditRecord, StoreError> {
            self.inner.append(record)
        }

        fn query_by_entity(
            &self,
            entity: EntityRef,
            limit: Option<usize>,
        ) -> Result<Vec<AuditRecord>, StoreError> {
            self.inner.query_by_entity(entity, limit)
        }

        fn query_by_time_range(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<AuditRecord>, StoreError> {
            self.inner.query_by_time_range(from, to)
        }
    }

    impl StorageBackend for RacingBackend {
        fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping()
        }

        fn load_or_create_entity(&self, key: EntityRef, now: DateTime<Utc>) -> Result<Entity, StoreError> {
            self.inner.load_or_create_entity(key, now)
        }

        fn commit_attribute(
            &self,
            key: EntityRef,
            expected_version: u64,
            change: &AttributeChange,
            now: DateTime<Utc>,
        ) -> Result<AuditRecord, StoreError> {
            self.lose_race(key)?;
            self.inner.commit_attribute(key, expected_version, change, now)
        }

        fn write_entity_data(&self, key: EntityRef, data: &Value, now: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.write_entity_data(key, data, now)
        }

        fn entities_with(
            &self,
            kind: EntityKind,
            name: &str,
            value: Option<&AttributeValue>,
        ) -> Result<BTreeSet<u64>, StoreError> {
            self.inner.entities_with(kind, name, value)
        }

        fn load_profile(&self, user_id: u64) -> Result<Option<StaffProfile>, StoreError> {
            self.inner.load_profile(user_id)
        }

        fn list_profiles(&self) -> Result<Vec<StaffProfile>, StoreError> {
            self.inner.list_profiles()
        }

        fn commit_profile(&self, commit: &ProfileCommit) -> Result<Vec<AuditRecord>, StoreError> {
            self.lose_race(format!("staff profile {}", commit.profile.user_id))?;
            self.inner.commit_profile(commit)
        }
    }

    fn racing_store(conflicts: usize) -> (Store, Arc<RacingBackend>) {
        let backend = Arc::new(RacingBackend::new(conflicts));
        let store = Store::new(backend.clone(), CacheOptions::default());
        (store, backend)
    }

    fn grant_support(store: &Store, user_id: u64) -> Result<ProfileUpdate<()>, StoreError> {
        store.update_profile(user_id, Some(7), "grant", |profile| {
            profile.grant_role(Role::Support);
            Ok::<_, StoreError>(())
        })
    }

    fn store() -> (Store, Arc<MemoryBackend>, Arc<ManualClock>) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Store::with_clock(backend.clone(), clock.clone(), CacheOptions::default());
        (store, backend, clock)
    }

    #[test]
    fn set_true_then_false_removes_attribute() {
        let (store, _, _) = store();
        let user = EntityRef::user(42);
        store.set_attribute(user, "beta", true, Some(7), "beta invite").unwrap();
        assert!(store.has_attribute(user, "BETA").unwrap());

        store.set_attribute(user, BETA, false, Some(7), "beta over").unwrap();
        assert!(!store.has_attribute(user, BETA).unwrap());
        assert!(!store.get_entity(user).unwrap().attributes.contains_key(BETA));
    }

    #[test]
    fn every_set_appends_one_record() {
        let (store, _, _) = store();
        let user = EntityRef::user(1);
        store.set_attribute(user, BETA, true, None, "a").unwrap();
        store.set_attribute(user, BETA, true, None, "b").unwrap();
        store.set_attribute(user, BETA, None::<bool>, None, "c").unwrap();

        let trail = store.query_audit_trail(user, None).unwrap();
        assert_eq!(trail.len(), 3);
        // Newest first.
        assert_eq!(trail[0].reason, "c");
        assert_eq!(trail[0].old_value, Some(Value::Bool(true)));
        assert_eq!(trail[0].new_value, None);
        assert!(trail[1].is_noop());
        assert_eq!(trail[2].old_value, None);
    }

    #[test]
    fn write_is_visible_immediately_despite_cache() {
        let (store, _, _) = store();
        let guild = EntityRef::guild(5);
        assert_eq!(store.get_attribute(guild, LANG).unwrap(), None);
        store.set_attribute(guild, LANG, "FR", None, "setup").unwrap();
        assert_eq!(
            store.get_attribute(guild, LANG).unwrap(),
            Some(AttributeValue::Text("FR".into()))
        );
    }

    #[test]
    fn cached_entity_expires_with_ttl() {
        let (store, backend, clock) = store();
        let user = EntityRef::user(9);
        store.get_entity(user).unwrap();

        // Written behind the store's back: invisible until the TTL lapses.
        backend
            .commit_attribute(
                user,
                0,
                &AttributeChange {
                    name: BETA.to_string(),
                    value: Some(AttributeValue::Flag),
                    actor_id: None,
                    reason: "direct".to_string(),
                },
                clock.now(),
            )
            .unwrap();
        assert!(!store.has_attribute(user, BETA).unwrap());
        clock.advance(Duration::seconds(301));
        assert!(store.has_attribute(user, BETA).unwrap());
    }

    #[test]
    fn profile_ttl_is_clamped() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Store::new(
            backend,
            CacheOptions {
                profile_ttl_secs: 3600,
                ..CacheOptions::default()
            },
        );
        assert_eq!(store.profile_cache().ttl(), Duration::seconds(60));
    }

    #[test]
    fn update_profile_projects_team_and_audits() {
        let (store, _, _) = store();
        let update = store
            .update_profile(42, Some(7), "role assignment", |profile| {
                profile.grant_role(Role::Moderator);
                Ok::<_, StoreError>(())
            })
            .unwrap();
        assert!(update.changed());
        assert_eq!(update.profile.version, 1);
        assert_eq!(update.profile.created_by, Some(7));

        let names: Vec<&str> = update.records.iter().map(|r| r.attribute_name.as_str()).collect();
        assert_eq!(names, vec!["staff.roles", TEAM]);
        assert!(store.has_attribute(EntityRef::user(42), TEAM).unwrap());
        assert!(store.load_profile(42).unwrap().has_role(Role::Moderator));
    }

    #[test]
    fn unchanged_profile_is_not_written() {
        let (store, _, _) = store();
        let update = store
            .update_profile(42, Some(7), "noop", |_| Ok::<_, StoreError>(5))
            .unwrap();
        assert!(!update.changed());
        assert_eq!(update.outcome, 5);
        assert!(store.query_audit_trail(EntityRef::user(42), None).unwrap().is_empty());
    }

    #[test]
    fn closure_error_aborts_without_writing() {
        let (store, _, _) = store();
        let result: Result<ProfileUpdate<()>, StoreError> =
            store.update_profile(42, Some(7), "fails", |profile| {
                profile.grant_role(Role::Support);
                Err(StoreError::Database("refused".into()))
            });
        assert!(result.is_err());
        assert!(!store.load_profile(42).unwrap().is_staff());
    }

    #[test]
    fn profile_cache_is_invalidated_on_update() {
        let (store, _, _) = store();
        assert!(!store.load_profile(3).unwrap().is_staff());
        store
            .update_profile(3, None, "grant", |p| {
                p.grant_role(Role::Support);
                Ok::<_, StoreError>(())
            })
            .unwrap();
        assert!(store.load_profile(3).unwrap().has_role(Role::Support));
        assert!(store.cache_stats().1.invalidations >= 1);
    }

    #[test]
    fn unavailable_backend_surfaces_distinct_error() {
        let (store, backend, _) = store();
        backend.set_available(false);
        let err = store
            .set_attribute(EntityRef::user(1), BETA, true, None, "x")
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.check_available().unwrap_err().is_unavailable());
    }

    #[test]
    fn attribute_write_survives_one_lost_race() {
        let (store, backend) = racing_store(1);
        let user = EntityRef::user(42);
        let record = store.set_attribute(user, BETA, true, Some(7), "invite").unwrap();
        assert_eq!(record.new_value, Some(Value::Bool(true)));

        assert_eq!(store.query_audit_trail(user, None).unwrap().len(), 1);
        assert_eq!(store.get_entity(user).unwrap().version, 1);
        assert_eq!(backend.pending.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn attribute_write_gives_up_after_second_lost_race() {
        let (store, _) = racing_store(2);
        let user = EntityRef::user(42);
        match store.set_attribute(user, BETA, true, Some(7), "invite") {
            Err(StoreError::Conflict { target }) => assert_eq!(target, user.to_string()),
            other => panic!("expected Conflict, got {:?}", other),
        }
        assert!(store.query_audit_trail(user, None).unwrap().is_empty());
        assert!(!store.has_attribute(user, BETA).unwrap());

        // The next write starts with a fresh retry budget.
        store.set_attribute(user, BETA, true, Some(7), "again").unwrap();
        assert_eq!(store.query_audit_trail(user, None).unwrap().len(), 1);
    }

    #[test]
    fn profile_write_survives_one_lost_race() {
        let (store, _) = racing_store(1);
        let update = grant_support(&store, 42).unwrap();
        assert_eq!(update.profile.version, 1);
        assert_eq!(update.records.len(), 2);

        let trail = store.query_audit_trail(EntityRef::user(42), None).unwrap();
        assert_eq!(trail.len(), 2);
        assert!(store.load_profile(42).unwrap().has_role(Role::Support));
    }

    #[test]
    fn profile_write_gives_up_after_second_lost_race() {
        let (store, _) = racing_store(2);
        match grant_support(&store, 42) {
            Err(StoreError::Conflict { .. }) => {}
            other => panic!("expected Conflict, got {:?}", other),
        }
        assert!(store.query_audit_trail(EntityRef::user(42), None).unwrap().is_empty());
        assert!(!store.load_profile(42).unwrap().is_staff());
        assert!(!store.has_attribute(EntityRef::user(42), TEAM).unwrap());
    }

    #[test]
    fn concurrent_writers_on_one_entity_are_serialised() {
        let (store, _, _) = store();
        let guild = EntityRef::guild(9);
        let threads = 8;
        let writes = 5;

        std::thread::scope(|scope| {
            for t in 0..threads {
                let store = &store;
                scope.spawn(move || {
                    for w in 0..writes {
                        let lang = format!("L{}X{}", t, w);
                        store
                            .set_attribute(guild, LANG, lang.as_str(), Some(t), "race")
                            .unwrap();
                    }
                });
            }
        });

        let trail = store.query_audit_trail(guild, None).unwrap();
        assert_eq!(trail.len(), (threads * writes) as usize);
        assert_eq!(store.get_entity(guild).unwrap().version, threads * writes);
        // Each record saw the value left by the one before it.
        for pair in trail.windows(2) {
            assert_eq!(pair[0].old_value, pair[1].new_value);
        }
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (store, _, _) = store();
        assert!(matches!(
            store.set_attribute(EntityRef::user(1), "  ", true, None, "x"),
            Err(StoreError::InvalidAttribute { .. })
        ));
    }
}
