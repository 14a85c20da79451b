// attr.rs - Attribute subcommands: get, set, remove, list.

use clap::Subcommand;
use warden_audit::{EntityKind, EntityRef};
use warden_staff::Warden;
use warden_store::{AttributeInput, AttributeValue};

use super::parse_entity;

#[derive(Subcommand)]
pub enum AttrCommands {
    /// Show one attribute, or every attribute of the entity.
    Get {
        /// Entity, e.g. `user:42` or `guild:7`.
        #[arg(value_parser = parse_entity)]
        entity: EntityRef,
        /// Attribute name (case-insensitive).
        name: Option<String>,
    },
    /// Set an attribute. `true`/`false` toggle a flag; digits store an
    /// integer; anything else is stored as text.
    Set {
        #[arg(value_parser = parse_entity)]
        entity: EntityRef,
        name: String,
        value: String,
        /// Acting user id; omit for a system change.
        #[arg(long)]
        actor: Option<u64>,
        #[arg(long, default_value = "set from cli")]
        reason: String,
    },
    /// Remove an attribute.
    Remove {
        #[arg(value_parser = parse_entity)]
        entity: EntityRef,
        name: String,
        #[arg(long)]
        actor: Option<u64>,
        #[arg(long, default_value = "removed from cli")]
        reason: String,
    },
    /// List entities holding an attribute.
    List {
        /// `user` or `guild`.
        kind: EntityKind,
        name: String,
        /// Only entities whose value equals this.
        #[arg(long)]
        value: Option<String>,
    },
}

pub fn execute(cmd: &AttrCommands, warden: &Warden) -> anyhow::Result<()> {
    match cmd {
        AttrCommands::Get { entity, name } => match name {
            Some(name) => match warden.get_attribute(*entity, name)? {
                Some(value) => println!("{}", value),
                None => println!("{} has no {}", entity, name.to_uppercase()),
            },
            None => {
                let snapshot = warden.get_entity(*entity)?;
                if snapshot.attributes.is_empty() {
                    println!("{} has no attributes.", entity);
                }
                for (name, value) in &snapshot.attributes {
                    println!("{:<16} {}", name, value);
                }
            }
        },

        AttrCommands::Set {
            entity,
            name,
            value,
            actor,
            reason,
        } => {
            let record = warden.set_attribute(
                *entity,
                name,
                AttributeInput::parse_cli(value),
                *actor,
                reason,
            )?;
            println!(
                "{} {}: {} -> {} (#{})",
                entity,
                record.attribute_name,
                json_or_absent(&record.old_value),
                json_or_absent(&record.new_value),
                record.sequence_id
            );
        }

        AttrCommands::Remove {
            entity,
            name,
            actor,
            reason,
        } => {
            let record = warden.set_attribute(*entity, name, AttributeInput::Clear, *actor, reason)?;
            println!("{} {} removed (#{})", entity, record.attribute_name, record.sequence_id);
        }

        AttrCommands::List { kind, name, value } => {
            let filter = value
                .as_deref()
                .and_then(|raw| AttributeInput::parse_cli(raw).normalize());
            if value.is_some() && filter.is_none() {
                anyhow::bail!("false never matches: flags are stored by presence only");
            }
            let ids = warden.list_entities_with_attribute(*kind, name, filter.as_ref())?;
            if ids.is_empty() {
                println!("No {} entities match.", kind);
            }
            for id in ids {
                println!("{}", EntityRef::new(*kind, id));
            }
        }
    }

    Ok(())
}

fn json_or_absent(value: &Option<serde_json::Value>) -> String {
    value
        .as_ref()
        .and_then(AttributeValue::from_json)
        .map_or_else(|| "absent".to_string(), |v| v.to_string())
}
