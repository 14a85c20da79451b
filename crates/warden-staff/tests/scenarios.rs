// scenarios.rs - End-to-end behaviour of the Warden facade.
//
// Each scenario runs against both backends: the in-memory one and SQLite
// in a temporary directory. The outage scenario needs the availability
// switch and runs on the memory backend only.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tempfile::{tempdir, TempDir};

use warden_audit::{EntityKind, EntityRef};
use warden_policy::{DenyReason, Role, RolePermissionKey};
use warden_staff::{BackendKind, StaffError, Warden, WardenConfig};
use warden_store::value::{BETA, LANG, TEAM};
use warden_store::{AttributeValue, MemoryBackend};

const SUPER_ADMIN: u64 = 1;
const DEV: u64 = 7;
const MANAGER: u64 = 10;
const SUPERVISOR: u64 = 20;
const MEMBER: u64 = 40;

fn config() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.authority.super_admin_id = SUPER_ADMIN;
    config.authority.elevated_group = BTreeSet::from([DEV]);
    config
}

/// One Warden per backend, plus the temp dir keeping SQLite alive.
fn backends() -> Vec<(&'static str, Warden, Option<TempDir>)> {
    let mut memory_config = config();
    memory_config.storage.backend = BackendKind::Memory;
    let memory = Warden::open(&memory_config, std::path::Path::new(".")).unwrap();

    let dir = tempdir().unwrap();
    let sqlite = Warden::open(&config(), dir.path()).unwrap();

    vec![("memory", memory, None), ("sqlite", sqlite, Some(dir))]
}

/// Sync the elevated group and seed a Manager and a Moderator.
fn seed(warden: &Warden) {
    warden.sync_elevated_group().unwrap();
    warden.assign_role(SUPER_ADMIN, MANAGER, Role::Manager).unwrap();
    warden.assign_role(SUPER_ADMIN, SUPERVISOR, Role::SupervisorMod).unwrap();
    warden.assign_role(MANAGER, MEMBER, Role::Moderator).unwrap();
}

fn perms(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn dev_sets_beta_flag_with_one_audit_record() {
    for (name, warden, _dir) in backends() {
        seed(&warden);
        let user = EntityRef::user(42);

        assert!(warden.authorize_command(DEV, "d.stats").unwrap().is_allowed());
        warden
            .set_attribute(user, BETA, true, Some(DEV), "beta invite")
            .unwrap();

        assert!(warden.has_attribute(user, BETA).unwrap(), "{}", name);
        let trail = warden.query_audit_trail(user, None).unwrap();
        assert_eq!(trail.len(), 1, "{}", name);
        assert_eq!(trail[0].old_value, None);
        assert_eq!(trail[0].new_value, Some(Value::Bool(true)));
        assert_eq!(trail[0].actor_id, Some(DEV));
        assert_eq!(trail[0].reason, "beta invite");
    }
}

#[test]
fn false_is_never_stored() {
    for (name, warden, _dir) in backends() {
        let user = EntityRef::user(42);
        warden.set_attribute(user, BETA, true, Some(DEV), "on").unwrap();
        warden.set_attribute(user, BETA, false, Some(DEV), "off").unwrap();

        assert!(!warden.has_attribute(user, BETA).unwrap(), "{}", name);
        let entity = warden.get_entity(user).unwrap();
        assert!(!entity.attributes.contains_key(BETA), "{}", name);

        let trail = warden.query_audit_trail(user, None).unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].old_value, Some(Value::Bool(true)));
        assert_eq!(trail[0].new_value, None);
    }
}

#[test]
fn lang_index_tracks_current_values() {
    for (name, warden, _dir) in backends() {
        for (guild, lang) in [(3, "FR"), (1, "EN"), (2, "FR"), (4, "DE")] {
            warden
                .set_attribute(EntityRef::guild(guild), LANG, lang, None, "setup")
                .unwrap();
        }
        warden
            .set_attribute(EntityRef::guild(4), LANG, "FR", None, "switch")
            .unwrap();
        warden
            .set_attribute(EntityRef::guild(3), LANG, "EN", None, "switch")
            .unwrap();

        let french = warden
            .list_entities_with_attribute(
                EntityKind::Guild,
                LANG,
                Some(&AttributeValue::Text("FR".into())),
            )
            .unwrap();
        assert_eq!(french, BTreeSet::from([2, 4]), "{}", name);
    }
}

#[test]
fn supervisor_cannot_grant_manager() {
    for (name, warden, _dir) in backends() {
        seed(&warden);
        let target = 30;
        match warden.assign_role(SUPERVISOR, target, Role::Manager) {
            Err(StaffError::PermissionDenied { reason, .. }) => {
                assert_eq!(reason, DenyReason::InsufficientPermission, "{}", name)
            }
            other => panic!("{}: expected PermissionDenied, got {:?}", name, other),
        }
        assert!(!warden.get_staff_profile(target).unwrap().is_staff());
        assert!(warden
            .query_audit_trail(EntityRef::user(target), None)
            .unwrap()
            .is_empty());
    }
}

#[test]
fn role_without_grants_is_denied_until_granted() {
    for (name, warden, _dir) in backends() {
        seed(&warden);

        let decision = warden.authorize_command(MEMBER, "mod.blacklist").unwrap();
        assert_eq!(
            decision.deny_reason(),
            Some(DenyReason::InsufficientPermission),
            "{}",
            name
        );

        warden
            .set_role_permissions(
                MANAGER,
                MEMBER,
                RolePermissionKey::Role(Role::Moderator),
                perms(&["blacklist"]),
            )
            .unwrap();
        assert!(
            warden.authorize_command(MEMBER, "mod.blacklist").unwrap().is_allowed(),
            "{}",
            name
        );
        // The grant is scoped to the permission, not the whole family.
        assert!(!warden
            .authorize_command(MEMBER, "mod.unblacklist")
            .unwrap()
            .is_allowed());

        let trail = warden.query_audit_trail(EntityRef::user(MEMBER), Some(1)).unwrap();
        assert_eq!(trail[0].attribute_name, "staff.permissions.Moderator");
        assert_eq!(trail[0].actor_id, Some(MANAGER));
    }
}

#[test]
fn legacy_denial_overrides_grant() {
    for (name, warden, _dir) in backends() {
        seed(&warden);
        warden
            .set_role_permissions(MANAGER, MEMBER, Role::Moderator.into(), perms(&["blacklist"]))
            .unwrap();
        warden
            .set_denied_commands(MANAGER, MEMBER, perms(&["mod.blacklist"]))
            .unwrap();

        let decision = warden.authorize_command(MEMBER, "mod.blacklist").unwrap();
        assert_eq!(
            decision.deny_reason(),
            Some(DenyReason::ExplicitlyDenied),
            "{}",
            name
        );
    }
}

#[test]
fn unrank_clears_roles_and_team_together() {
    for (name, warden, _dir) in backends() {
        seed(&warden);
        let user = EntityRef::user(MEMBER);
        assert!(warden.has_attribute(user, TEAM).unwrap(), "{}", name);

        let profile = warden.unrank(MANAGER, MEMBER).unwrap();
        assert!(!profile.is_staff());
        assert!(!warden.has_attribute(user, TEAM).unwrap(), "{}", name);
        assert!(!warden.get_staff_profile(MEMBER).unwrap().is_staff());

        let trail = warden.query_audit_trail(user, Some(2)).unwrap();
        let names: BTreeSet<&str> = trail.iter().map(|r| r.attribute_name.as_str()).collect();
        assert_eq!(names, BTreeSet::from(["staff.roles", TEAM]), "{}", name);
        assert_eq!(trail[0].recorded_at, trail[1].recorded_at);
    }
}

#[test]
fn no_actor_grants_at_or_above_own_rank() {
    for (name, warden, _dir) in backends() {
        for (offset, actor_role) in Role::ALL.iter().enumerate() {
            let actor = 100 + offset as u64;
            warden.assign_role(SUPER_ADMIN, actor, *actor_role).unwrap();

            for (target_offset, role) in Role::ALL.iter().enumerate() {
                let target = 1000 + (offset * 10 + target_offset) as u64;
                let result = warden.assign_role(actor, target, *role);
                assert_eq!(
                    result.is_ok(),
                    actor_role.rank() < role.rank(),
                    "{}: {} granting {}",
                    name,
                    actor_role,
                    role
                );
            }
        }
    }
}

#[test]
fn synced_members_keep_dev_and_manager() {
    for (name, warden, _dir) in backends() {
        seed(&warden);
        let profile = warden.get_staff_profile(DEV).unwrap();
        assert!(profile.has_role(Role::Dev) && profile.has_role(Role::Manager), "{}", name);

        for role in [Role::Dev, Role::Manager] {
            match warden.revoke_role(SUPER_ADMIN, DEV, role) {
                Err(StaffError::ProtectedRole { .. }) | Err(StaffError::RoleDependency { .. }) => {}
                other => panic!("{}: expected protection, got {:?}", name, other),
            }
        }
        assert!(matches!(
            warden.unrank(SUPER_ADMIN, DEV),
            Err(StaffError::ProtectedRole { .. })
        ));

        // A second sync writes nothing.
        let before = warden.query_audit_trail(EntityRef::user(DEV), None).unwrap().len();
        assert!(warden.sync_elevated_group().unwrap().is_noop());
        let after = warden.query_audit_trail(EntityRef::user(DEV), None).unwrap().len();
        assert_eq!(before, after, "{}", name);
    }
}

#[test]
fn storage_outage_fails_closed() {
    let backend = Arc::new(MemoryBackend::new());
    let warden = Warden::with_backend(backend.clone(), &config());
    seed(&warden);
    warden
        .set_role_permissions(MANAGER, MEMBER, Role::Moderator.into(), perms(&["blacklist"]))
        .unwrap();
    assert!(warden.authorize_command(MEMBER, "mod.blacklist").unwrap().is_allowed());

    backend.set_available(false);

    // The cached profile would allow it; the outage wins.
    let decision = warden.authorize_command(MEMBER, "mod.blacklist").unwrap();
    assert_eq!(decision.deny_reason(), Some(DenyReason::StorageUnavailable));
    assert!(warden.authorize_command(SUPER_ADMIN, "d.shutdown").unwrap().is_allowed());
    assert!(warden.authorize_command(DEV, "d.shutdown").unwrap().is_allowed());

    match warden.assign_role(SUPER_ADMIN, 50, Role::Support) {
        Err(err) => assert!(err.is_unavailable(), "expected unavailable, got {:?}", err),
        Ok(profile) => panic!("expected failure, got {:?}", profile),
    }

    backend.set_available(true);
    assert!(warden.authorize_command(MEMBER, "mod.blacklist").unwrap().is_allowed());
    assert_eq!(warden.recent_denials(5).len(), 1);
}

#[test]
fn sqlite_state_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let warden = Warden::open(&config(), dir.path()).unwrap();
        seed(&warden);
        warden
            .set_attribute(EntityRef::guild(9), LANG, "FR", Some(MANAGER), "setup")
            .unwrap();
    }

    let warden = Warden::open(&config(), dir.path()).unwrap();
    assert!(warden.get_staff_profile(MEMBER).unwrap().has_role(Role::Moderator));
    assert!(warden.has_attribute(EntityRef::user(MEMBER), TEAM).unwrap());
    assert_eq!(
        warden.get_attribute(EntityRef::guild(9), LANG).unwrap(),
        Some(AttributeValue::Text("FR".into()))
    );

    let staff = warden.list_staff().unwrap();
    assert_eq!(staff[&Role::Moderator].len(), 1);
    assert_eq!(staff[&Role::Dev][0].user_id, DEV);
}

#[test]
fn reopen_restores_elevated_protection() {
    let dir = tempdir().unwrap();
    {
        let warden = Warden::open(&config(), dir.path()).unwrap();
        seed(&warden);
    }

    let warden = Warden::open(&config(), dir.path()).unwrap();
    assert!(warden.is_synced_member(DEV));
    match warden.revoke_role(SUPER_ADMIN, DEV, Role::Dev) {
        Err(StaffError::ProtectedRole { role, .. }) => assert_eq!(role, Role::Dev),
        other => panic!("expected ProtectedRole, got {:?}", other),
    }
    assert!(warden.get_staff_profile(DEV).unwrap().has_role(Role::Dev));
}

#[test]
fn open_promotes_members_added_to_the_config() {
    let dir = tempdir().unwrap();
    drop(Warden::open(&config(), dir.path()).unwrap());

    let mut grown = config();
    grown.authority.elevated_group.insert(8);
    let warden = Warden::open(&grown, dir.path()).unwrap();
    let profile = warden.get_staff_profile(8).unwrap();
    assert!(profile.has_role(Role::Dev) && profile.has_role(Role::Manager));
    assert!(warden.is_synced_member(8));
}

#[test]
fn unsynced_warden_still_trusts_members_during_outage() {
    let backend = Arc::new(MemoryBackend::new());
    let warden = Warden::with_backend(backend.clone(), &config());
    backend.set_available(false);

    assert!(warden.authorize_command(DEV, "d.shutdown").unwrap().is_allowed());
    assert_eq!(
        warden.authorize_command(MANAGER, "d.shutdown").unwrap().deny_reason(),
        Some(DenyReason::StorageUnavailable)
    );
}
