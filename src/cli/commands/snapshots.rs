//! Typed backup and snapshot commands.

use crate::core::rollback::RollbackManager;
use crate::models::config::Config;
use crate::Result;
use colored::Colorize;

pub fn list(config: &Config) -> Result<()> {
    let manager = RollbackManager::new(config);
    let backups = manager.list_backups()?;
    let snapshots = manager.list_snapshots()?;

    println!("{}", "[Backups]".bold().cyan());
    if backups.is_empty() {
        println!("  (none)");
    }
    for b in &backups {
        println!(
            "  {} {:?} {}  {}",
            b.backup_id.bold(),
            b.backup_type,
            b.source_path,
            b.timestamp
        );
    }
    println!();

    println!("{}", "[Snapshots]".bold().cyan());
    if snapshots.is_empty() {
        println!("  (none)");
    }
    for s in &snapshots {
        println!(
            "  {} {:?} {}  {}",
            s.snapshot_id.bold(),
            s.snapshot_type,
            s.description,
            s.timestamp
        );
    }
    Ok(())
}

pub fn cleanup(max_age_days: Option<u64>, keep: Option<usize>, config: &Config) -> Result<()> {
    let manager = RollbackManager::new(config);
    let max_age_days = max_age_days.unwrap_or(config.backup_max_age_days);
    let keep = keep.unwrap_or(config.backup_keep_minimum);

    let removed = manager.cleanup_old_backups(max_age_days, keep)?;
    if removed.is_empty() {
        println!(
            "[INFO] No backups older than {} day(s) beyond the newest {}",
            max_age_days, keep
        );
    } else {
        println!(
            "{}",
            format!("[OK] Removed {} expired backup(s)", removed.len()).green()
        );
    }
    Ok(())
}
