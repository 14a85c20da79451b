// engine.rs - Permission resolution engine.
//
// Every staff command passes through `authorize()`, which checks in order
// (first match wins):
//
// 1. Is the actor the Super Admin? -> Allow
// 2. Does the actor hold Dev? -> Allow
// 3. Is the command in the actor's legacy denied list? -> Deny(ExplicitlyDenied)
// 4. Does any held role (or "common") grant the permission? -> Allow
// 5. Nothing matched -> Deny(InsufficientPermission)
//
// When the backing store is unreachable the profile cannot be trusted and
// `fail_closed()` replaces the whole procedure: only the Super Admin and
// synced elevated-group members may act.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::command::{CommandDescriptor, CommandFamily};
use crate::profile::{RolePermissionKey, StaffProfile};
use crate::role::{Authority, Role};

/// Why a command was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The command is on the actor's legacy `denied_commands` list.
    ExplicitlyDenied,
    /// No held role grants the required permission.
    InsufficientPermission,
    /// The store is unreachable and the actor is not exempt.
    StorageUnavailable,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::ExplicitlyDenied => "explicitly denied",
            DenyReason::InsufficientPermission => "insufficient permission",
            DenyReason::StorageUnavailable => "storage unavailable",
        };
        f.write_str(text)
    }
}

/// The result of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: DenyReason },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny { reason } => Some(*reason),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => f.write_str("allow"),
            Decision::Deny { reason } => write!(f, "deny ({})", reason),
        }
    }
}

/// One check the engine performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationStep {
    /// e.g. "super_admin", "denied_commands".
    pub check: String,
    /// e.g. "passed", "matched: Moderator".
    pub outcome: String,
    /// True for the step that produced the decision.
    pub terminal: bool,
}

/// A decision plus every step that led to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub decision: Decision,
    pub steps: Vec<EvaluationStep>,
    /// The `role:permission` grant that allowed the command, if any.
    pub matching_grant: Option<String>,
}

impl EvaluationTrace {
    fn new() -> Self {
        Self {
            decision: Decision::Deny {
                reason: DenyReason::InsufficientPermission,
            },
            steps: Vec::new(),
            matching_grant: None,
        }
    }

    fn pass(&mut self, check: &str, outcome: impl Into<String>) {
        self.steps.push(EvaluationStep {
            check: check.to_string(),
            outcome: outcome.into(),
            terminal: false,
        });
    }

    fn decide(mut self, check: &str, outcome: impl Into<String>, decision: Decision) -> Self {
        self.steps.push(EvaluationStep {
            check: check.to_string(),
            outcome: outcome.into(),
            terminal: true,
        });
        self.decision = decision;
        self
    }
}

/// Stateless evaluator. Holds only the Super Admin identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEngine {
    super_admin_id: Option<u64>,
}

impl PermissionEngine {
    pub fn new(super_admin_id: Option<u64>) -> Self {
        Self { super_admin_id }
    }

    pub fn super_admin_id(&self) -> Option<u64> {
        self.super_admin_id
    }

    pub fn is_super_admin(&self, user_id: u64) -> bool {
        self.super_admin_id == Some(user_id)
    }

    /// The authority `profile` brings to a hierarchy check.
    pub fn authority(&self, profile: &StaffProfile) -> Authority {
        self.authority_of(profile.user_id, profile)
    }

    /// Authority of `user_id`, using `profile` for its roles. Lets callers
    /// ask about an actor whose profile row has not been created yet.
    pub fn authority_of(&self, user_id: u64, profile: &StaffProfile) -> Authority {
        if self.is_super_admin(user_id) {
            return Authority::SuperAdmin;
        }
        match profile.best_rank() {
            Some(rank) => Authority::Ranked(rank),
            None => Authority::Unranked,
        }
    }

    /// Decide whether `profile` may run `command`.
    pub fn authorize(&self, profile: &StaffProfile, command: &CommandDescriptor) -> Decision {
        self.authorize_with_trace(profile, command).decision
    }

    /// Same as `authorize`, recording every check.
    pub fn authorize_with_trace(
        &self,
        profile: &StaffProfile,
        command: &CommandDescriptor,
    ) -> EvaluationTrace {
        let mut trace = EvaluationTrace::new();

        if self.is_super_admin(profile.user_id) {
            return trace.decide("super_admin", "matched", Decision::Allow);
        }
        trace.pass("super_admin", "not super admin");

        if profile.has_role(Role::Dev) {
            return trace.decide("dev_bypass", "holds Dev", Decision::Allow);
        }
        trace.pass("dev_bypass", "does not hold Dev");

        let command_id = command.id();
        if profile.is_denied(&command_id) {
            return trace.decide(
                "denied_commands",
                format!("{} is denied", command_id),
                Decision::Deny {
                    reason: DenyReason::ExplicitlyDenied,
                },
            );
        }
        trace.pass("denied_commands", "not listed");

        for role in profile.roles() {
            if !profile.grants(role, &command.permission) {
                continue;
            }
            let direct = profile
                .role_permissions()
                .get(&RolePermissionKey::Role(role))
                .is_some_and(|granted| granted.contains(&command.permission));
            if direct {
                trace.matching_grant = Some(format!("{}:{}", role, command.permission));
                return trace.decide("role_grants", format!("matched: {}", role), Decision::Allow);
            }
            trace.matching_grant = Some(format!("common:{}", command.permission));
            return trace.decide(
                "role_grants",
                format!("matched: common via {}", role),
                Decision::Allow,
            );
        }

        trace.decide(
            "role_grants",
            format!("no role grants {}", command.permission),
            Decision::Deny {
                reason: DenyReason::InsufficientPermission,
            },
        )
    }

    /// Decision when the store is unreachable: the profile is ignored.
    pub fn fail_closed(
        &self,
        actor_id: u64,
        is_synced_member: bool,
        command: &CommandDescriptor,
    ) -> EvaluationTrace {
        let mut trace = EvaluationTrace::new();
        trace.pass("storage", "unavailable");

        if self.is_super_admin(actor_id) {
            return trace.decide("super_admin", "matched", Decision::Allow);
        }
        if is_synced_member {
            return trace.decide("elevated_group", "synced member", Decision::Allow);
        }
        trace.decide(
            "fail_closed",
            format!("{} refused while storage is unavailable", command.id()),
            Decision::Deny {
                reason: DenyReason::StorageUnavailable,
            },
        )
    }

    /// Whether the holder of `profile` belongs to the family's role-type.
    ///
    /// This is the coarse gate used to list which command groups a staff
    /// member can see; `authorize` still decides every invocation.
    pub fn can_use_family(&self, profile: &StaffProfile, family: CommandFamily) -> bool {
        if self.is_super_admin(profile.user_id) || profile.has_role(Role::Dev) {
            return true;
        }
        match family {
            CommandFamily::Common => profile.is_staff(),
            family => profile.roles().any(|role| role.family() == family),
        }
    }
}
