// authorize.rs - Explain a permission decision step by step.

use warden_staff::Warden;

pub fn execute(warden: &Warden, actor: u64, command_id: &str) -> anyhow::Result<()> {
    let command = warden.registry().lookup_id(command_id)?;
    let trace = warden.authorize_with_trace(actor, command);

    println!(
        "{} for user {}: {} (requires '{}')",
        command, actor, trace.decision, command.permission
    );
    for step in &trace.steps {
        println!(
            "  {:<16} {}{}",
            step.check,
            step.outcome,
            if step.terminal { "  <- decided" } else { "" }
        );
    }
    if let Some(grant) = &trace.matching_grant {
        println!("  grant: {}", grant);
    }
    Ok(())
}
