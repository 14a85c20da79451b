//! # warden
//!
//! Operator command line for a Warden store.
//!
//! - `warden attr get/set/remove/list` - entity attributes
//! - `warden staff rank/revoke/unrank/perms/deny/info/list` - staff roles
//! - `warden authorize` - explain a permission decision
//! - `warden sync` - reconcile the elevated group
//! - `warden audit tail/range/export/verify` - the audit trail

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use warden_staff::{Warden, WardenConfig};

/// Warden: staff roles, permissions and audited attributes.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Config file (defaults to <project-root>/.warden/warden.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read and write entity attributes.
    Attr {
        #[command(subcommand)]
        command: commands::attr::AttrCommands,
    },
    /// Manage staff roles and permissions.
    Staff {
        #[command(subcommand)]
        command: commands::staff::StaffCommands,
    },
    /// Decide whether an actor may run a command, with the full trace.
    Authorize {
        /// Acting user id.
        actor: u64,
        /// Command id, e.g. `mod.blacklist`.
        command: String,
    },
    /// Reconcile the elevated group with the stored profiles.
    Sync,
    /// Inspect and export the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("warden_store=info".parse()?)
        .add_directive("warden_staff=info".parse()?);
    // Logs go to stderr so command output on stdout stays clean.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = match &cli.config {
        Some(path) => WardenConfig::load(path)?,
        None => WardenConfig::for_project(&project_root)?,
    };
    tracing::debug!(root = %project_root.display(), backend = ?config.storage.backend, "opening warden");
    let warden = Warden::open(&config, &project_root)
        .with_context(|| format!("failed to open the store under {}", project_root.display()))?;

    match &cli.command {
        Commands::Attr { command } => commands::attr::execute(command, &warden),
        Commands::Staff { command } => commands::staff::execute(command, &warden),
        Commands::Authorize { actor, command } => {
            commands::authorize::execute(&warden, *actor, command)
        }
        Commands::Sync => commands::sync::execute(&warden),
        Commands::Audit { command } => commands::audit::execute(command, &warden, &project_root),
    }
}
