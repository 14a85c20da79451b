// role.rs - Staff roles and the rank table.
//
// Roles form a fixed total order, highest authority first. A lower rank
// number means more authority. Every hierarchy check in the system goes
// through `Authority::outranks`, so the Super Admin and Dev exemptions are
// expressed exactly once.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::CommandFamily;
use crate::error::PolicyError;

/// A staff role. Declaration order is rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Dev,
    Manager,
    #[serde(rename = "Supervisor_Mod")]
    SupervisorMod,
    #[serde(rename = "Supervisor_Com")]
    SupervisorCom,
    #[serde(rename = "Supervisor_Sup")]
    SupervisorSup,
    Moderator,
    Communication,
    Support,
}

/// Position of a role in the hierarchy. Lower is more authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rank(pub u8);

impl Role {
    /// Every role, highest authority first.
    pub const ALL: [Role; 8] = [
        Role::Dev,
        Role::Manager,
        Role::SupervisorMod,
        Role::SupervisorCom,
        Role::SupervisorSup,
        Role::Moderator,
        Role::Communication,
        Role::Support,
    ];

    pub fn rank(self) -> Rank {
        Rank(self as u8)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Dev => "Dev",
            Role::Manager => "Manager",
            Role::SupervisorMod => "Supervisor_Mod",
            Role::SupervisorCom => "Supervisor_Com",
            Role::SupervisorSup => "Supervisor_Sup",
            Role::Moderator => "Moderator",
            Role::Communication => "Communication",
            Role::Support => "Support",
        }
    }

    /// The command family this role's members work in.
    pub fn family(self) -> CommandFamily {
        match self {
            Role::Dev => CommandFamily::Dev,
            Role::Manager => CommandFamily::Management,
            Role::SupervisorMod | Role::Moderator => CommandFamily::Moderator,
            Role::SupervisorCom | Role::Communication => CommandFamily::Communication,
            Role::SupervisorSup | Role::Support => CommandFamily::Support,
        }
    }

    /// Roles that are only ever held through the elevated-group sync.
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::Dev | Role::Manager)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PolicyError::UnknownRole(s.to_string()))
    }
}

/// The authority an actor brings to a hierarchy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// The single configured super actor. Above every rank.
    SuperAdmin,
    /// Best (lowest) rank among the actor's roles.
    Ranked(Rank),
    /// Holds no staff role.
    Unranked,
}

impl Authority {
    /// Strictly above `rank`. Equal rank never outranks.
    pub fn outranks(&self, rank: Rank) -> bool {
        match self {
            Authority::SuperAdmin => true,
            Authority::Ranked(own) => *own < rank,
            Authority::Unranked => false,
        }
    }

    /// Strictly above another actor's authority.
    ///
    /// Any staff member outranks a non-staff user; nobody outranks the
    /// Super Admin.
    pub fn outranks_authority(&self, other: &Authority) -> bool {
        match other {
            Authority::SuperAdmin => false,
            Authority::Ranked(rank) => self.outranks(*rank),
            Authority::Unranked => !matches!(self, Authority::Unranked),
        }
    }
}
