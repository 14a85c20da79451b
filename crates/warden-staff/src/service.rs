// service.rs - The Warden facade exposed to the surrounding application.
//
// Wires the store, the permission engine, the staff manager and the
// elevated-group source together. Authorization fails closed: when the
// store cannot be reached, only the Super Admin and synced elevated-group
// members are allowed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use warden_audit::{AuditRecord, EntityKind, EntityRef};
use warden_policy::{
    CommandDescriptor, CommandRegistry, Decision, DecisionHistory, DenialRecord, EvaluationTrace,
    PermissionEngine, Role, RolePermissionKey, StaffProfile,
};
use warden_store::value::{normalize_name, TEAM};
use warden_store::{
    AttributeInput, AttributeValue, Entity, MemoryBackend, SqliteBackend, StorageBackend, Store,
    StoreError,
};

use crate::config::{BackendKind, WardenConfig};
use crate::elevated::{ElevatedGroupSource, StaticElevatedGroup};
use crate::error::StaffError;
use crate::manager::{StaffManager, SyncReport};

pub struct Warden {
    store: Arc<Store>,
    engine: PermissionEngine,
    registry: CommandRegistry,
    manager: StaffManager,
    history: Mutex<DecisionHistory>,
    elevated: Box<dyn ElevatedGroupSource>,
}

impl Warden {
    /// Open the backend named by `config`, resolving relative paths
    /// against `project_root`, then reconcile the elevated group.
    pub fn open(config: &WardenConfig, project_root: &Path) -> Result<Self, StaffError> {
        let backend: Arc<dyn StorageBackend> = match config.storage.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::Sqlite => {
                let path = config.database_path(project_root);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                        reason: format!("cannot create {}: {}", parent.display(), e),
                    })?;
                }
                tracing::debug!(path = %path.display(), "opening sqlite store");
                Arc::new(SqliteBackend::open(&path)?)
            }
        };
        let warden = Self::with_backend(backend, config);
        warden.sync_elevated_group()?;
        Ok(warden)
    }

    pub fn with_backend(backend: Arc<dyn StorageBackend>, config: &WardenConfig) -> Self {
        let store = Arc::new(Store::new(backend, config.cache_options()));
        let source = StaticElevatedGroup::new(config.authority.elevated_group.iter().copied());
        Self::with_parts(store, config, Box::new(source))
    }

    pub fn with_parts(
        store: Arc<Store>,
        config: &WardenConfig,
        elevated: Box<dyn ElevatedGroupSource>,
    ) -> Self {
        let engine = PermissionEngine::new(config.super_admin());
        let manager = StaffManager::new(store.clone(), engine);
        // Members are trusted before the first sync runs.
        match elevated.members() {
            Ok(members) => manager.set_synced_members(members),
            Err(err) => tracing::warn!(error = %err, "elevated group unavailable at startup"),
        }
        Self {
            manager,
            store,
            engine,
            registry: CommandRegistry::builtin(),
            history: Mutex::new(DecisionHistory::new(config.history.capacity)),
            elevated,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    pub fn engine(&self) -> &PermissionEngine {
        &self.engine
    }

    // ── Attributes ──────────────────────────────────────────────

    pub fn get_entity(&self, key: EntityRef) -> Result<Entity, StaffError> {
        Ok(self.store.get_entity(key)?)
    }

    pub fn get_attribute(&self, key: EntityRef, name: &str) -> Result<Option<AttributeValue>, StaffError> {
        Ok(self.store.get_attribute(key, name)?)
    }

    pub fn has_attribute(&self, key: EntityRef, name: &str) -> Result<bool, StaffError> {
        Ok(self.store.has_attribute(key, name)?)
    }

    /// Set or clear an attribute. `TEAM` is derived from staff roles and
    /// cannot be written here.
    pub fn set_attribute(
        &self,
        key: EntityRef,
        name: &str,
        value: impl Into<AttributeInput>,
        actor_id: Option<u64>,
        reason: &str,
    ) -> Result<AuditRecord, StaffError> {
        if normalize_name(name).as_deref() == Some(TEAM) {
            return Err(StaffError::ReservedAttribute {
                name: TEAM.to_string(),
            });
        }
        Ok(self.store.set_attribute(key, name, value, actor_id, reason)?)
    }

    pub fn list_entities_with_attribute(
        &self,
        kind: EntityKind,
        name: &str,
        value: Option<&AttributeValue>,
    ) -> Result<BTreeSet<u64>, StaffError> {
        Ok(self.store.list_entities_with(kind, name, value)?)
    }

    // ── Authorization ───────────────────────────────────────────

    pub fn authorize(&self, actor_id: u64, command: &CommandDescriptor) -> Decision {
        self.authorize_with_trace(actor_id, command).decision
    }

    /// Decide and explain. Storage failures never surface as errors here:
    /// they produce a fail-closed decision instead.
    pub fn authorize_with_trace(&self, actor_id: u64, command: &CommandDescriptor) -> EvaluationTrace {
        let profile = self
            .store
            .check_available()
            .and_then(|()| self.store.load_profile(actor_id));

        let trace = match profile {
            Ok(profile) => self.engine.authorize_with_trace(&profile, command),
            Err(err) => {
                tracing::warn!(actor = actor_id, command = %command.id(), error = %err, "store unavailable, failing closed");
                self.engine
                    .fail_closed(actor_id, self.manager.is_synced_member(actor_id), command)
            }
        };

        if let Decision::Deny { reason } = trace.decision {
            tracing::warn!(actor = actor_id, command = %command.id(), %reason, "command denied");
            self.history().push(DenialRecord {
                actor_id,
                command: command.id(),
                reason,
                at: self.store.now(),
            });
        } else {
            tracing::debug!(actor = actor_id, command = %command.id(), "command allowed");
        }
        trace
    }

    /// Look `command_id` (`prefix.name`) up in the registry and authorize it.
    pub fn authorize_command(&self, actor_id: u64, command_id: &str) -> Result<Decision, StaffError> {
        let command = self.registry.lookup_id(command_id)?;
        Ok(self.authorize(actor_id, command))
    }

    /// Up to `n` denials, newest first.
    pub fn recent_denials(&self, n: usize) -> Vec<DenialRecord> {
        self.history().recent(n)
    }

    // ── Staff management ────────────────────────────────────────

    pub fn assign_role(&self, actor: u64, target: u64, role: Role) -> Result<StaffProfile, StaffError> {
        self.manager.assign_role(actor, target, role)
    }

    pub fn revoke_role(&self, actor: u64, target: u64, role: Role) -> Result<StaffProfile, StaffError> {
        self.manager.revoke_role(actor, target, role)
    }

    pub fn unrank(&self, actor: u64, target: u64) -> Result<StaffProfile, StaffError> {
        self.manager.unrank(actor, target)
    }

    pub fn set_role_permissions(
        &self,
        actor: u64,
        target: u64,
        key: RolePermissionKey,
        permissions: BTreeSet<String>,
    ) -> Result<StaffProfile, StaffError> {
        self.manager.set_role_permissions(actor, target, key, permissions)
    }

    /// Replace the legacy denied list. Every entry must name a registered
    /// command.
    pub fn set_denied_commands(
        &self,
        actor: u64,
        target: u64,
        commands: BTreeSet<String>,
    ) -> Result<StaffProfile, StaffError> {
        for id in &commands {
            self.registry.lookup_id(id)?;
        }
        self.manager.set_denied_commands(actor, target, commands)
    }

    pub fn get_staff_profile(&self, user_id: u64) -> Result<StaffProfile, StaffError> {
        self.manager.get_staff_profile(user_id)
    }

    pub fn list_staff(&self) -> Result<BTreeMap<Role, Vec<StaffProfile>>, StaffError> {
        self.manager.list_staff()
    }

    pub fn is_synced_member(&self, user_id: u64) -> bool {
        self.manager.is_synced_member(user_id)
    }

    /// Reconcile profiles with the elevated-group source.
    pub fn sync_elevated_group(&self) -> Result<SyncReport, StaffError> {
        let members = self.elevated.members()?;
        self.manager.sync_elevated_group(&members)
    }

    // ── Audit ───────────────────────────────────────────────────

    pub fn query_audit_trail(&self, key: EntityRef, limit: Option<usize>) -> Result<Vec<AuditRecord>, StaffError> {
        Ok(self.store.query_audit_trail(key, limit)?)
    }

    pub fn query_audit_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, StaffError> {
        Ok(self.store.query_audit_range(from, to)?)
    }

    fn history(&self) -> MutexGuard<'_, DecisionHistory> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_policy::DenyReason;

    fn warden() -> (Warden, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let mut config = WardenConfig::default();
        config.authority.super_admin_id = 1;
        config.authority.elevated_group = BTreeSet::from([7]);
        config.history.capacity = 2;
        (Warden::with_backend(backend.clone(), &config), backend)
    }

    #[test]
    fn team_cannot_be_set_directly() {
        let (warden, _) = warden();
        match warden.set_attribute(EntityRef::user(5), "team", true, Some(1), "sneaky") {
            Err(StaffError::ReservedAttribute { name }) => assert_eq!(name, TEAM),
            other => panic!("expected ReservedAttribute, got {:?}", other),
        }
    }

    #[test]
    fn unknown_command_ids_are_rejected() {
        let (warden, _) = warden();
        assert!(matches!(
            warden.authorize_command(1, "mod.nonexistent"),
            Err(StaffError::UnknownCommand(_))
        ));
        assert!(matches!(
            warden.set_denied_commands(1, 5, BTreeSet::from(["nope.blacklist".to_string()])),
            Err(StaffError::UnknownCommand(_))
        ));
    }

    #[test]
    fn denials_are_kept_in_bounded_history() {
        let (warden, _) = warden();
        for actor in [10, 11, 12] {
            let decision = warden.authorize_command(actor, "mod.blacklist").unwrap();
            assert_eq!(decision.deny_reason(), Some(DenyReason::InsufficientPermission));
        }
        let recent = warden.recent_denials(10);
        let actors: Vec<u64> = recent.iter().map(|d| d.actor_id).collect();
        assert_eq!(actors, vec![12, 11]);
    }

    #[test]
    fn members_are_known_before_the_first_sync() {
        let (warden, backend) = warden();
        assert!(warden.is_synced_member(7));
        backend.set_available(false);

        let blacklist = warden.registry().lookup_id("mod.blacklist").unwrap().clone();
        assert!(warden.authorize(7, &blacklist).is_allowed());
        assert_eq!(
            warden.authorize(8, &blacklist).deny_reason(),
            Some(DenyReason::StorageUnavailable)
        );
    }

    #[test]
    fn sync_pulls_from_configured_source() {
        let (warden, _) = warden();
        let report = warden.sync_elevated_group().unwrap();
        assert_eq!(report.promoted, vec![7]);
        assert!(warden.is_synced_member(7));
        assert!(warden
            .get_attribute(EntityRef::user(7), "developer")
            .unwrap()
            .is_some());
    }

    #[test]
    fn outage_fails_closed_except_for_trusted_actors() {
        let (warden, backend) = warden();
        warden.sync_elevated_group().unwrap();
        backend.set_available(false);

        let blacklist = warden.registry().lookup_id("mod.blacklist").unwrap().clone();
        assert!(warden.authorize(1, &blacklist).is_allowed());
        assert!(warden.authorize(7, &blacklist).is_allowed());
        assert_eq!(
            warden.authorize(10, &blacklist).deny_reason(),
            Some(DenyReason::StorageUnavailable)
        );
    }

    #[test]
    fn open_creates_the_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default();
        let warden = Warden::open(&config, dir.path()).unwrap();
        warden
            .set_attribute(EntityRef::guild(3), "lang", "EN", None, "setup")
            .unwrap();
        assert!(dir.path().join(".warden/warden.db").exists());
    }
}
