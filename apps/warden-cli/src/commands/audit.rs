// audit.rs - Audit subcommands: tail, range, export, verify.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use warden_audit::{AuditError, AuditLog, AuditRecord, EntityRef};
use warden_staff::config::WARDEN_DIR;
use warden_staff::Warden;

use super::parse_entity;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Show the latest changes to one entity.
    Tail {
        #[arg(value_parser = parse_entity)]
        entity: EntityRef,
        /// Number of records to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Show every change in a time window (RFC 3339 bounds).
    Range {
        /// Defaults to 24 hours ago.
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Defaults to now.
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Append records not yet exported to a hash-chained JSONL file.
    Export {
        /// Defaults to .warden/audit.jsonl.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Verify the hash chain of an export.
    Verify {
        /// Defaults to .warden/audit.jsonl.
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

pub fn execute(cmd: &AuditCommands, warden: &Warden, project_root: &Path) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Tail { entity, n } => {
            let records = warden.query_audit_trail(*entity, Some(*n))?;
            if records.is_empty() {
                println!("No audit records for {}.", entity);
                return Ok(());
            }
            print_header();
            // Stored newest first; print in time order.
            for record in records.iter().rev() {
                print_record(record);
            }
        }

        AuditCommands::Range { from, to } => {
            let to = to.unwrap_or_else(Utc::now);
            let from = from.unwrap_or(to - Duration::hours(24));
            if from > to {
                anyhow::bail!("--from {} is after --to {}", from, to);
            }
            let records = warden.query_audit_range(from, to)?;
            if records.is_empty() {
                println!("No audit records between {} and {}.", from, to);
                return Ok(());
            }
            print_header();
            for record in &records {
                print_record(record);
            }
        }

        AuditCommands::Export { log } => {
            let path = log.clone().unwrap_or_else(|| default_export(project_root));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let records = warden.query_audit_range(DateTime::<Utc>::UNIX_EPOCH, Utc::now())?;
            let mut export = AuditLog::open(&path)?;
            let written = export.append_new(&records)?;
            println!("Exported {} new record(s) to {}", written, path.display());
        }

        AuditCommands::Verify { log } => {
            let path = log.clone().unwrap_or_else(|| default_export(project_root));
            if !path.exists() {
                println!("No audit export found at {}", path.display());
                return Ok(());
            }
            match AuditLog::verify_chain(&path) {
                Ok(count) => {
                    println!("Audit export verified: {} record(s), hash chain intact.", count);
                }
                Err(AuditError::IntegrityViolation {
                    line,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at line {}:", line);
                    println!("  Expected previous_hash: {}", expected);
                    println!("  Actual previous_hash:   {}", actual);
                    anyhow::bail!("audit export integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

fn default_export(project_root: &Path) -> PathBuf {
    project_root.join(WARDEN_DIR).join("audit.jsonl")
}

fn print_header() {
    println!(
        "{:<6} {:<20} {:<14} {:<26} {:<10} CHANGE",
        "SEQ", "TIMESTAMP", "ENTITY", "ATTRIBUTE", "ACTOR"
    );
    println!("{}", "-".repeat(100));
}

fn print_record(record: &AuditRecord) {
    let actor = record
        .actor_id
        .map_or_else(|| "system".to_string(), |id| id.to_string());
    println!(
        "{:<6} {:<20} {:<14} {:<26} {:<10} {} -> {}  ({})",
        record.sequence_id,
        record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        record.entity.to_string(),
        record.attribute_name,
        actor,
        value_text(&record.old_value),
        value_text(&record.new_value),
        record.reason,
    );
}

fn value_text(value: &Option<serde_json::Value>) -> String {
    value
        .as_ref()
        .map_or_else(|| "absent".to_string(), |v| v.to_string())
}
