// mod.rs - Subcommand implementations and shared argument parsers.

pub mod attr;
pub mod audit;
pub mod authorize;
pub mod staff;
pub mod sync;

use std::collections::BTreeSet;

use warden_audit::{EntityKind, EntityRef};

/// Parse `user:42` or `guild:7`.
pub fn parse_entity(raw: &str) -> Result<EntityRef, String> {
    let (kind, id) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected <user|guild>:<id>, got '{}'", raw))?;
    let kind: EntityKind = kind.parse()?;
    let id = id
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid id '{}': {}", id, e))?;
    Ok(EntityRef::new(kind, id))
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_set(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
