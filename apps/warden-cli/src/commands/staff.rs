// staff.rs - Staff subcommands: rank, revoke, unrank, perms, deny, info, list.

use clap::Subcommand;
use warden_policy::{Role, RolePermissionKey, StaffProfile};
use warden_staff::Warden;

use super::parse_set;

#[derive(Subcommand)]
pub enum StaffCommands {
    /// Grant a role.
    Rank {
        target: u64,
        /// Role name, e.g. `Moderator` or `Supervisor_Mod`.
        role: Role,
        /// Acting user id.
        #[arg(long)]
        actor: u64,
    },
    /// Remove one role.
    Revoke {
        target: u64,
        role: Role,
        #[arg(long)]
        actor: u64,
    },
    /// Remove every role, permission and denial.
    Unrank {
        target: u64,
        #[arg(long)]
        actor: u64,
    },
    /// Replace the permissions granted under one role (or `common`).
    Perms {
        target: u64,
        /// Role name or `common`.
        key: RolePermissionKey,
        /// Comma-separated permissions; empty clears them.
        #[arg(default_value = "")]
        permissions: String,
        #[arg(long)]
        actor: u64,
    },
    /// Replace the legacy denied-commands list.
    Deny {
        target: u64,
        /// Comma-separated command ids, e.g. `mod.blacklist,d.sql`.
        #[arg(default_value = "")]
        commands: String,
        #[arg(long)]
        actor: u64,
    },
    /// Show a staff profile.
    Info { user: u64 },
    /// List staff grouped by role.
    List,
}

pub fn execute(cmd: &StaffCommands, warden: &Warden) -> anyhow::Result<()> {
    match cmd {
        StaffCommands::Rank { target, role, actor } => {
            let profile = warden.assign_role(*actor, *target, *role)?;
            print_profile(&profile);
        }
        StaffCommands::Revoke { target, role, actor } => {
            let profile = warden.revoke_role(*actor, *target, *role)?;
            print_profile(&profile);
        }
        StaffCommands::Unrank { target, actor } => {
            warden.unrank(*actor, *target)?;
            println!("User {} is no longer staff.", target);
        }
        StaffCommands::Perms {
            target,
            key,
            permissions,
            actor,
        } => {
            let profile =
                warden.set_role_permissions(*actor, *target, *key, parse_set(permissions))?;
            print_profile(&profile);
        }
        StaffCommands::Deny {
            target,
            commands,
            actor,
        } => {
            let profile = warden.set_denied_commands(*actor, *target, parse_set(commands))?;
            print_profile(&profile);
        }
        StaffCommands::Info { user } => {
            let profile = warden.get_staff_profile(*user)?;
            if profile.is_staff() {
                print_profile(&profile);
            } else {
                println!("User {} is not staff.", user);
            }
            if warden.is_synced_member(*user) {
                println!("  (elevated group member)");
            }
        }
        StaffCommands::List => {
            let staff = warden.list_staff()?;
            if staff.is_empty() {
                println!("No staff.");
            }
            for (role, members) in staff {
                let ids: Vec<String> = members.iter().map(|p| p.user_id.to_string()).collect();
                println!("{:<16} {}", role, ids.join(", "));
            }
        }
    }

    Ok(())
}

fn print_profile(profile: &StaffProfile) {
    let roles: Vec<&str> = profile.roles().map(Role::as_str).collect();
    println!("User {}", profile.user_id);
    println!(
        "  roles:    {}",
        if roles.is_empty() { "-".to_string() } else { roles.join(", ") }
    );
    for (key, permissions) in profile.role_permissions() {
        let list: Vec<&str> = permissions.iter().map(String::as_str).collect();
        println!("  {:<9} {}", format!("{}:", key), list.join(", "));
    }
    if !profile.denied_commands().is_empty() {
        let list: Vec<&str> = profile.denied_commands().iter().map(String::as_str).collect();
        println!("  denied:   {}", list.join(", "));
    }
    if let Some(updated) = profile.updated_at {
        let by = profile
            .updated_by
            .map_or_else(|| "system".to_string(), |id| id.to_string());
        println!("  updated:  {} by {}", updated.format("%Y-%m-%d %H:%M:%S"), by);
    }
}
