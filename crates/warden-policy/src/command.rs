// command.rs - Command descriptors and the static command registry.
//
// Staff commands are invoked as `<prefix>.<name>` (e.g. `mod.blacklist`).
// Each command maps to one required permission identifier and one command
// family. The registry is plain data built from a table literal, so it can
// be tested without any dispatch machinery.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// The role-type a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFamily {
    /// Team commands, open to every staff member with the grant.
    Common,
    Management,
    Dev,
    Moderator,
    Support,
    Communication,
}

impl CommandFamily {
    pub const ALL: [CommandFamily; 6] = [
        CommandFamily::Common,
        CommandFamily::Management,
        CommandFamily::Dev,
        CommandFamily::Moderator,
        CommandFamily::Support,
        CommandFamily::Communication,
    ];

    /// Invocation prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            CommandFamily::Common => "t",
            CommandFamily::Management => "m",
            CommandFamily::Dev => "d",
            CommandFamily::Moderator => "mod",
            CommandFamily::Support => "sup",
            CommandFamily::Communication => "com",
        }
    }

    pub fn from_prefix(prefix: &str) -> Result<Self, PolicyError> {
        CommandFamily::ALL
            .into_iter()
            .find(|family| family.prefix().eq_ignore_ascii_case(prefix))
            .ok_or_else(|| PolicyError::UnknownFamily(prefix.to_string()))
    }
}

impl fmt::Display for CommandFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandFamily::Common => "common",
            CommandFamily::Management => "management",
            CommandFamily::Dev => "dev",
            CommandFamily::Moderator => "moderator",
            CommandFamily::Support => "support",
            CommandFamily::Communication => "communication",
        };
        f.write_str(name)
    }
}

/// One staff command: `(family, name)` and the permission it requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub family: CommandFamily,
    pub name: String,
    pub permission: String,
}

impl CommandDescriptor {
    pub fn new(family: CommandFamily, name: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            family,
            name: name.into(),
            permission: permission.into(),
        }
    }

    /// `<prefix>.<name>`, the identifier used by `denied_commands`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.family.prefix(), self.name)
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family.prefix(), self.name)
    }
}

/// Built-in staff commands: family, name, required permission.
const BUILTIN_COMMANDS: &[(CommandFamily, &str, &str)] = &[
    (CommandFamily::Common, "help", "help"),
    (CommandFamily::Common, "invite", "invite"),
    (CommandFamily::Common, "serverinfo", "serverinfo"),
    (CommandFamily::Common, "mutualserver", "mutualserver"),
    (CommandFamily::Common, "user", "user_lookup"),
    (CommandFamily::Common, "server", "server_lookup"),
    (CommandFamily::Common, "flex", "flex"),
    (CommandFamily::Management, "rank", "rank"),
    (CommandFamily::Management, "unrank", "unrank"),
    (CommandFamily::Management, "setstaff", "setstaff"),
    (CommandFamily::Management, "stafflist", "stafflist"),
    (CommandFamily::Management, "staffinfo", "staffinfo"),
    (CommandFamily::Dev, "reload", "reload"),
    (CommandFamily::Dev, "shutdown", "shutdown"),
    (CommandFamily::Dev, "stats", "stats"),
    (CommandFamily::Dev, "sql", "sql"),
    (CommandFamily::Dev, "jsk", "jsk"),
    (CommandFamily::Dev, "error", "error"),
    (CommandFamily::Moderator, "blacklist", "blacklist"),
    (CommandFamily::Moderator, "unblacklist", "unblacklist"),
];

/// Lookup table from `(family, name)` to descriptor.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<(CommandFamily, String), CommandDescriptor>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of built-in staff commands.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (family, name, permission) in BUILTIN_COMMANDS {
            registry.register(CommandDescriptor::new(*family, *name, *permission));
        }
        registry
    }

    /// Add or replace a command. Names are stored lowercase, matching
    /// `lookup`.
    pub fn register(&mut self, mut command: CommandDescriptor) {
        command.name = command.name.to_ascii_lowercase();
        self.commands
            .insert((command.family, command.name.clone()), command);
    }

    pub fn lookup(&self, family: CommandFamily, name: &str) -> Option<&CommandDescriptor> {
        self.commands.get(&(family, name.to_ascii_lowercase()))
    }

    /// Resolve a `<prefix>.<name>` identifier.
    pub fn lookup_id(&self, id: &str) -> Result<&CommandDescriptor, PolicyError> {
        let (prefix, name) = id
            .trim()
            .split_once('.')
            .ok_or_else(|| PolicyError::UnknownCommand(id.to_string()))?;
        let family = CommandFamily::from_prefix(prefix)?;
        self.lookup(family, name)
            .ok_or_else(|| PolicyError::UnknownCommand(id.to_string()))
    }

    pub fn by_family(&self, family: CommandFamily) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands
            .values()
            .filter(move |command| command.family == family)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl FromStr for CommandFamily {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandFamily::from_prefix(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_ids() {
        let registry = CommandRegistry::builtin();
        let blacklist = registry.lookup_id("mod.blacklist").unwrap();
        assert_eq!(blacklist.family, CommandFamily::Moderator);
        assert_eq!(blacklist.permission, "blacklist");
        assert_eq!(blacklist.id(), "mod.blacklist");

        let rank = registry.lookup_id("M.rank").unwrap();
        assert_eq!(rank.family, CommandFamily::Management);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let registry = CommandRegistry::builtin();
        assert_eq!(
            registry.lookup_id("mod.ban"),
            Err(PolicyError::UnknownCommand("mod.ban".to_string()))
        );
        assert_eq!(
            registry.lookup_id("x.help"),
            Err(PolicyError::UnknownFamily("x".to_string()))
        );
        assert!(registry.lookup_id("blacklist").is_err());
    }

    #[test]
    fn by_family_lists_only_that_family() {
        let registry = CommandRegistry::builtin();
        let dev: Vec<_> = registry
            .by_family(CommandFamily::Dev)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(dev.len(), 6);
        assert!(dev.contains(&"sql"));
        assert_eq!(registry.by_family(CommandFamily::Support).count(), 0);
    }

    #[test]
    fn register_replaces_existing_entry() {
        let mut registry = CommandRegistry::builtin();
        let before = registry.len();
        registry.register(CommandDescriptor::new(
            CommandFamily::Moderator,
            "blacklist",
            "blacklist_v2",
        ));
        assert_eq!(registry.len(), before);
        assert_eq!(
            registry
                .lookup(CommandFamily::Moderator, "blacklist")
                .unwrap()
                .permission,
            "blacklist_v2"
        );
    }

    #[test]
    fn mixed_case_registrations_are_found() {
        let mut registry = CommandRegistry::new();
        registry.register(CommandDescriptor::new(CommandFamily::Dev, "Purge", "purge"));

        for name in ["purge", "PURGE", "Purge"] {
            let command = registry.lookup(CommandFamily::Dev, name).unwrap();
            assert_eq!(command.id(), "d.purge");
        }
        assert!(registry.lookup_id("d.Purge").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn prefixes_round_trip() {
        for family in CommandFamily::ALL {
            assert_eq!(CommandFamily::from_prefix(family.prefix()).unwrap(), family);
        }
    }
}
