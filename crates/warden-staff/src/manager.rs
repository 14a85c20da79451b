// manager.rs - Staff Profile Manager.
//
// Every role or permission change goes through here. The manager checks the
// actor against the rank hierarchy, then hands a mutation closure to
// `Store::update_profile`, which commits the profile, its audit records and
// the derived TEAM attribute in one transaction.
//
// Hierarchy rules:
//   assign_role          actor outranks the role being granted
//   revoke_role, unrank  actor outranks the target's best current role
//   set_role_permissions actor outranks the role (or, for "common", the
//                        target), belongs to the role's family, and
//                        outranks the target
//   set_denied_commands  actor outranks the target
//
// The Super Admin passes every check. Synced elevated-group members cannot
// lose Dev or Manager through revoke_role or unrank.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use warden_audit::EntityRef;
use warden_policy::{Authority, PermissionEngine, Role, RolePermissionKey, StaffProfile};
use warden_store::value::DEVELOPER;
use warden_store::Store;

use crate::error::StaffError;

/// Outcome of one elevated-group reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub members: BTreeSet<u64>,
    /// Members that were missing Dev or Manager and received them.
    pub promoted: Vec<u64>,
    /// Members that received the DEVELOPER flag.
    pub flagged: Vec<u64>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.promoted.is_empty() && self.flagged.is_empty()
    }
}

pub struct StaffManager {
    store: Arc<Store>,
    engine: PermissionEngine,
    synced: RwLock<BTreeSet<u64>>,
}

impl StaffManager {
    pub fn new(store: Arc<Store>, engine: PermissionEngine) -> Self {
        Self {
            store,
            engine,
            synced: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn is_synced_member(&self, user_id: u64) -> bool {
        self.synced
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&user_id)
    }

    pub fn synced_members(&self) -> BTreeSet<u64> {
        self.synced.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Record the elevated group's membership without touching storage.
    /// `sync_elevated_group` does this and then reconciles profiles.
    pub fn set_synced_members(&self, members: BTreeSet<u64>) {
        *self.synced.write().unwrap_or_else(|e| e.into_inner()) = members;
    }

    pub fn get_staff_profile(&self, user_id: u64) -> Result<StaffProfile, StaffError> {
        Ok(self.store.load_profile(user_id)?)
    }

    /// Staff members grouped by role, highest role first. A member holding
    /// several roles appears under each of them.
    pub fn list_staff(&self) -> Result<BTreeMap<Role, Vec<StaffProfile>>, StaffError> {
        let mut groups: BTreeMap<Role, Vec<StaffProfile>> = BTreeMap::new();
        for profile in self.store.list_profiles()? {
            for role in profile.roles() {
                groups.entry(role).or_default().push(profile.clone());
            }
        }
        Ok(groups)
    }

    /// Grant `role` to `target`. Granting Dev also grants Manager.
    pub fn assign_role(&self, actor: u64, target: u64, role: Role) -> Result<StaffProfile, StaffError> {
        let authority = self.authority(actor)?;
        if !authority.outranks(role.rank()) {
            tracing::warn!(actor, target, %role, "role assignment refused");
            return Err(StaffError::denied(
                actor,
                format!("cannot grant {}: at or above own rank", role),
            ));
        }

        let reason = format!("role assignment: {}", role);
        let update = self.store.update_profile(target, Some(actor), &reason, |profile| {
            profile.grant_role(role);
            Ok::<_, StaffError>(())
        })?;
        if update.changed() {
            tracing::info!(actor, target, %role, "role assigned");
        }
        Ok(update.profile)
    }

    /// Remove `role` from `target`, dropping its permission entry.
    pub fn revoke_role(&self, actor: u64, target: u64, role: Role) -> Result<StaffProfile, StaffError> {
        let authority = self.authority(actor)?;
        let protected = self.is_synced_member(target);

        let reason = format!("role revocation: {}", role);
        let update = self.store.update_profile(target, Some(actor), &reason, |profile| -> Result<(), StaffError> {
            if !profile.has_role(role) {
                return Err(StaffError::RoleNotHeld { target, role });
            }
            self.require_outranks_target(actor, &authority, profile)?;
            if protected && role.is_elevated() {
                return Err(StaffError::ProtectedRole { target, role });
            }
            profile.revoke_role(role)?;
            Ok(())
        });
        let update = self.log_refusal(actor, target, update)?;
        tracing::info!(actor, target, %role, "role revoked");
        Ok(update.profile)
    }

    /// Remove every role, grant and legacy denial from `target`.
    pub fn unrank(&self, actor: u64, target: u64) -> Result<StaffProfile, StaffError> {
        let authority = self.authority(actor)?;
        let protected = self.is_synced_member(target);

        let update = self.store.update_profile(target, Some(actor), "unrank", |profile| -> Result<(), StaffError> {
            self.require_outranks_target(actor, &authority, profile)?;
            if protected {
                if let Some(role) = [Role::Dev, Role::Manager]
                    .into_iter()
                    .find(|role| profile.has_role(*role))
                {
                    return Err(StaffError::ProtectedRole { target, role });
                }
            }
            profile.clear();
            Ok(())
        });
        let update = self.log_refusal(actor, target, update)?;
        if update.changed() {
            tracing::info!(actor, target, "staff member unranked");
        }
        Ok(update.profile)
    }

    /// Replace the permissions `target` holds for `key`.
    pub fn set_role_permissions(
        &self,
        actor: u64,
        target: u64,
        key: RolePermissionKey,
        permissions: BTreeSet<String>,
    ) -> Result<StaffProfile, StaffError> {
        let actor_profile = self.store.load_profile(actor)?;
        let authority = self.engine.authority_of(actor, &actor_profile);

        if let RolePermissionKey::Role(role) = key {
            if !authority.outranks(role.rank()) {
                return Err(StaffError::denied(
                    actor,
                    format!("cannot set permissions for {}: at or above own rank", role),
                ));
            }
            if !self.belongs_to_family(&authority, &actor_profile, role) {
                return Err(StaffError::denied(
                    actor,
                    format!("cannot set permissions for {}: not a member of its team", role),
                ));
            }
        }

        let reason = format!("permissions update: {}", key);
        let update = self.store.update_profile(target, Some(actor), &reason, |profile| -> Result<(), StaffError> {
            match key {
                RolePermissionKey::Role(role) if !profile.has_role(role) => {
                    return Err(StaffError::RoleNotHeld { target, role });
                }
                RolePermissionKey::Common if !profile.is_staff() => {
                    return Err(StaffError::NotStaff { target });
                }
                _ => {}
            }
            self.require_outranks_target(actor, &authority, profile)?;
            profile.set_permissions(key, permissions.clone());
            Ok(())
        });
        let update = self.log_refusal(actor, target, update)?;
        if update.changed() {
            tracing::info!(actor, target, %key, "role permissions updated");
        }
        Ok(update.profile)
    }

    /// Replace the legacy denied-commands list of `target`.
    pub fn set_denied_commands(
        &self,
        actor: u64,
        target: u64,
        commands: BTreeSet<String>,
    ) -> Result<StaffProfile, StaffError> {
        let authority = self.authority(actor)?;
        let update = self
            .store
            .update_profile(target, Some(actor), "denied commands update", |profile| -> Result<(), StaffError> {
                self.require_outranks_target(actor, &authority, profile)?;
                profile.set_denied_commands(commands.clone());
                Ok(())
            });
        let update = self.log_refusal(actor, target, update)?;
        if update.changed() {
            tracing::info!(actor, target, count = commands.len(), "denied commands updated");
        }
        Ok(update.profile)
    }

    /// Make every member hold Dev + Manager and the DEVELOPER flag, and
    /// remember the membership for role protection and fail-closed mode.
    ///
    /// Idempotent: compliant members are left untouched and produce no
    /// audit records. Former members keep their roles but lose protection.
    pub fn sync_elevated_group(&self, members: &BTreeSet<u64>) -> Result<SyncReport, StaffError> {
        self.set_synced_members(members.clone());

        let mut report = SyncReport {
            members: members.clone(),
            ..SyncReport::default()
        };
        for &member in members {
            let update = self.store.update_profile(member, None, "elevated group sync", |profile| {
                profile.grant_role(Role::Dev);
                Ok::<_, StaffError>(())
            })?;
            if update.changed() {
                report.promoted.push(member);
            }

            let user = EntityRef::user(member);
            if !self.store.has_attribute(user, DEVELOPER)? {
                self.store
                    .set_attribute(user, DEVELOPER, true, None, "elevated group sync")?;
                report.flagged.push(member);
            }
        }

        tracing::info!(
            members = report.members.len(),
            promoted = report.promoted.len(),
            flagged = report.flagged.len(),
            "elevated group synced"
        );
        Ok(report)
    }

    fn authority(&self, actor: u64) -> Result<Authority, StaffError> {
        let profile = self.store.load_profile(actor)?;
        Ok(self.engine.authority_of(actor, &profile))
    }

    fn require_outranks_target(
        &self,
        actor: u64,
        authority: &Authority,
        target: &StaffProfile,
    ) -> Result<(), StaffError> {
        // The Super Admin may edit any profile, its own included.
        if matches!(authority, Authority::SuperAdmin) {
            return Ok(());
        }
        let target_authority = self.engine.authority(target);
        if authority.outranks_authority(&target_authority) {
            Ok(())
        } else {
            Err(StaffError::denied(
                actor,
                format!("user {} is not below the actor", target.user_id),
            ))
        }
    }

    // Dev and Manager administer every team; others only their own family.
    fn belongs_to_family(&self, authority: &Authority, actor: &StaffProfile, role: Role) -> bool {
        matches!(authority, Authority::SuperAdmin)
            || actor.has_role(role)
            || actor.has_role(Role::Manager)
            || actor.roles().any(|held| held.family() == role.family())
    }

    fn log_refusal<T>(
        &self,
        actor: u64,
        target: u64,
        result: Result<T, StaffError>,
    ) -> Result<T, StaffError> {
        if let Err(err) = &result {
            match err {
                StaffError::PermissionDenied { .. } | StaffError::ProtectedRole { .. } => {
                    tracing::warn!(actor, target, error = %err, "staff change refused");
                }
                _ => {}
            }
        }
        result
    }
}
