// sync.rs - Reconcile the configured elevated group.

use warden_staff::Warden;

pub fn execute(warden: &Warden) -> anyhow::Result<()> {
    let report = warden.sync_elevated_group()?;
    if report.members.is_empty() {
        println!("Elevated group is empty; nothing to sync.");
        return Ok(());
    }
    if report.is_noop() {
        println!("{} member(s) already in sync.", report.members.len());
        return Ok(());
    }
    for id in &report.promoted {
        println!("granted Dev + Manager to {}", id);
    }
    for id in &report.flagged {
        println!("set DEVELOPER on {}", id);
    }
    Ok(())
}
