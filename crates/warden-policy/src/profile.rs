// profile.rs - The staff profile data type.
//
// A staff profile holds the roles a user holds, the permissions granted per
// role (plus the "common" pseudo-role), and the legacy denied-commands list.
// Mutation goes through methods so the profile can never hold `Dev` without
// `Manager`, including after deserialization.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PolicyError;
use crate::role::{Rank, Role};

/// Key of the `role_permissions` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RolePermissionKey {
    /// Permissions that apply whichever role the holder uses.
    Common,
    Role(Role),
}

impl RolePermissionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolePermissionKey::Common => "common",
            RolePermissionKey::Role(role) => role.as_str(),
        }
    }
}

impl fmt::Display for RolePermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RolePermissionKey {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("common") {
            Ok(RolePermissionKey::Common)
        } else {
            s.parse().map(RolePermissionKey::Role)
        }
    }
}

impl From<Role> for RolePermissionKey {
    fn from(role: Role) -> Self {
        RolePermissionKey::Role(role)
    }
}

impl Serialize for RolePermissionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RolePermissionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Roles, grants and legacy denials of one staff user.
///
/// An empty role set means "not staff".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaffProfile {
    pub user_id: u64,

    #[serde(default, deserialize_with = "deserialize_roles")]
    roles: BTreeSet<Role>,

    #[serde(default)]
    role_permissions: BTreeMap<RolePermissionKey, BTreeSet<String>>,

    /// Deprecated, still consulted ahead of grants.
    #[serde(default)]
    denied_commands: BTreeSet<String>,

    /// Optimistic concurrency version; 0 for a profile never persisted.
    #[serde(default)]
    pub version: u64,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: Option<u64>,
    pub updated_by: Option<u64>,
}

fn deserialize_roles<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<Role>, D::Error> {
    let mut roles = BTreeSet::<Role>::deserialize(deserializer)?;
    if roles.contains(&Role::Dev) {
        roles.insert(Role::Manager);
    }
    Ok(roles)
}

impl StaffProfile {
    /// An empty, never-persisted profile.
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            roles: BTreeSet::new(),
            role_permissions: BTreeMap::new(),
            denied_commands: BTreeSet::new(),
            version: 0,
            created_at: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
        }
    }

    /// Held roles, highest authority first.
    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.roles.iter().copied()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_staff(&self) -> bool {
        !self.roles.is_empty()
    }

    /// The best rank among held roles, `None` when not staff.
    pub fn best_rank(&self) -> Option<Rank> {
        self.roles.iter().next().map(|role| role.rank())
    }

    /// Add a role. Granting `Dev` also grants `Manager`.
    /// Returns true if the role set changed.
    pub fn grant_role(&mut self, role: Role) -> bool {
        let mut changed = self.roles.insert(role);
        if role == Role::Dev {
            changed |= self.roles.insert(Role::Manager);
        }
        changed
    }

    /// Remove a role and its permission entry.
    ///
    /// `Manager` cannot be removed while `Dev` is held. Removing the last
    /// role also drops every grant, `common` included.
    pub fn revoke_role(&mut self, role: Role) -> Result<bool, PolicyError> {
        if role == Role::Manager && self.roles.contains(&Role::Dev) {
            return Err(PolicyError::RoleDependency {
                role: Role::Manager,
                required_by: Role::Dev,
            });
        }
        if !self.roles.remove(&role) {
            return Ok(false);
        }
        self.role_permissions.remove(&RolePermissionKey::Role(role));
        if self.roles.is_empty() {
            self.role_permissions.clear();
        }
        Ok(true)
    }

    /// Drop every role, grant and legacy denial.
    pub fn clear(&mut self) {
        self.roles.clear();
        self.role_permissions.clear();
        self.denied_commands.clear();
    }

    /// Granted permissions for one key (empty when none).
    pub fn permissions_for(&self, key: RolePermissionKey) -> BTreeSet<String> {
        self.role_permissions.get(&key).cloned().unwrap_or_default()
    }

    pub fn role_permissions(&self) -> &BTreeMap<RolePermissionKey, BTreeSet<String>> {
        &self.role_permissions
    }

    /// Replace the grants for one key. An empty set removes the entry.
    pub fn set_permissions(&mut self, key: RolePermissionKey, permissions: BTreeSet<String>) {
        if permissions.is_empty() {
            self.role_permissions.remove(&key);
        } else {
            self.role_permissions.insert(key, permissions);
        }
    }

    /// True if `permission` is granted to `role` directly or through `common`.
    pub fn grants(&self, role: Role, permission: &str) -> bool {
        [RolePermissionKey::Role(role), RolePermissionKey::Common]
            .iter()
            .filter_map(|key| self.role_permissions.get(key))
            .any(|set| set.contains(permission))
    }

    pub fn denied_commands(&self) -> &BTreeSet<String> {
        &self.denied_commands
    }

    pub fn set_denied_commands(&mut self, commands: BTreeSet<String>) {
        self.denied_commands = commands;
    }

    pub fn is_denied(&self, command_id: &str) -> bool {
        self.denied_commands.contains(command_id)
    }
}
