//! Module backup commands.

use crate::core::state::StateManager;
use crate::models::backup::{BackupRequest, DatabaseSpec, ModuleBackupInfo};
use crate::models::config::Config;
use crate::models::outcome::Outcome;
use crate::Result;
use colored::Colorize;
use std::path::PathBuf;

/// Inputs of a manual module backup.
#[derive(Debug, Default)]
pub struct BackupArgs {
    pub files: Vec<PathBuf>,
    pub services: Vec<String>,
    pub sqlite: Vec<PathBuf>,
    pub postgres: Vec<String>,
    pub description: String,
}

impl BackupArgs {
    fn into_request(self) -> BackupRequest {
        let mut request = BackupRequest::new(self.description);
        for file in self.files {
            request = request.file(file);
        }
        for service in self.services {
            request = request.service(service);
        }
        for path in self.sqlite {
            request = request.database(DatabaseSpec::sqlite(path));
        }
        for name in self.postgres {
            request = request.database(DatabaseSpec::postgres(name));
        }
        request
    }
}

pub async fn backup(module: &str, args: BackupArgs, config: &Config) -> Result<()> {
    let manager = StateManager::new(config);
    let report = manager
        .backup_module_state(module, &args.into_request())
        .await?;

    print_outcome("Files", &report.files);
    print_outcome("Services", &report.services);
    print_outcome("Databases", &report.databases);
    println!();

    if report.is_partial() {
        println!(
            "{}",
            format!("[WARNING] Backup of {} is partial", module).yellow()
        );
    } else {
        println!("{}", format!("[OK] Backed up {}", module).green());
    }
    println!("  {} {}", "Location:".bold(), report.info.backup_dir.display());
    println!("  {} {}", "Checksum:".bold(), report.info.checksum);
    Ok(())
}

pub async fn restore(module: &str, config: &Config) -> Result<()> {
    println!(
        "{}",
        format!("[WARNING] Restoring {} will overwrite its current state", module)
            .bold()
            .yellow()
    );
    println!();

    let manager = StateManager::new(config);
    let report = manager.restore_module_state(module).await?;

    print_outcome("Files", &report.files);
    print_outcome("Databases", &report.databases);
    print_outcome("Services", &report.services);
    println!(
        "  {} {}/{}",
        "Permissions:".bold(),
        report.permissions_restored,
        report.permissions_total
    );
    println!();

    if report.is_success() {
        println!("{}", format!("[OK] Restored {}", module).green());
        Ok(())
    } else {
        println!("{}", format!("[FAIL] Restore of {} was incomplete", module).red());
        Err(crate::Error::RestoreFailed(module.to_string()))
    }
}

pub fn list(config: &Config) -> Result<()> {
    let manager = StateManager::new(config);
    let backups = manager.list_module_backups()?;

    if backups.is_empty() {
        println!("[INFO] No module backups in {}", manager.backup_root().display());
        return Ok(());
    }

    println!("{}", "[Module Backups]".bold().cyan());
    for info in &backups {
        println!(
            "  {} {}  {}",
            info.module_name.bold(),
            info.timestamp,
            info.description
        );
    }
    Ok(())
}

pub fn show(module: &str, config: &Config) -> Result<()> {
    let manager = StateManager::new(config);
    let info = manager
        .get_backup_info(module)?
        .ok_or_else(|| crate::Error::BackupNotFound(module.to_string()))?;
    print_info(&info);
    Ok(())
}

pub fn remove(module: &str, config: &Config) -> Result<()> {
    let manager = StateManager::new(config);
    if manager.remove_module_backup(module)? {
        println!("{}", format!("[OK] Removed backup of {}", module).green());
    } else {
        println!("[INFO] {} has no backup", module);
    }
    Ok(())
}

pub fn cleanup(config: &Config) -> Result<()> {
    let manager = StateManager::new(config);
    let removed = manager.cleanup_orphaned_backups()?;
    if removed.is_empty() {
        println!("[INFO] No orphaned backup directories");
    } else {
        for dir in &removed {
            println!("  {} {}", "-".red(), dir);
        }
        println!(
            "{}",
            format!("[OK] Removed {} orphaned backup(s)", removed.len()).green()
        );
    }
    Ok(())
}

fn print_info(info: &ModuleBackupInfo) {
    println!("{}", format!("[Backup: {}]", info.module_name).bold().cyan());
    println!("  {} {}", "Created:".bold(), info.timestamp);
    println!("  {} {}", "Description:".bold(), info.description);
    println!("  {} {}", "Location:".bold(), info.backup_dir.display());
    println!("  {} {}", "Checksum:".bold(), info.checksum);

    if !info.files.is_empty() {
        println!("  {}", "Files:".bold());
        for file in &info.files {
            println!("    {}", file.display());
        }
    }
    if !info.services.is_empty() {
        println!("  {} {}", "Services:".bold(), info.services.join(", "));
    }
    if !info.databases.is_empty() {
        println!("  {}", "Databases:".bold());
        for db in &info.databases {
            println!("    {}", db);
        }
    }
    println!(
        "  {} {} entries",
        "Permissions:".bold(),
        info.file_permissions.len()
    );
}

fn print_outcome(label: &str, outcome: &Outcome) {
    if outcome.is_noop() && outcome.skipped.is_empty() {
        return;
    }
    let status = if outcome.is_complete() {
        "[OK]".green()
    } else if outcome.is_usable() {
        "[PARTIAL]".yellow()
    } else {
        "[FAIL]".red()
    };
    println!(
        "  {} {}: {} ok, {} failed, {} skipped",
        status,
        label.bold(),
        outcome.succeeded.len(),
        outcome.failed.len(),
        outcome.skipped.len()
    );
    for failure in &outcome.failed {
        println!("      {} {}", "->".yellow(), failure);
    }
}
