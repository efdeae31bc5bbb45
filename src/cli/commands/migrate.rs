//! Migrate command implementation.

use super::spinner;
use crate::core::migration::MigrationManager;
use crate::models::config::Config;
use crate::Result;
use colored::Colorize;
use std::path::Path;

pub async fn migrate(manifest: &Path, scripts_dir: &Path, config: &Config) -> Result<()> {
    println!("{}", "[MIGRATE] Running migrations".bold().cyan());
    println!();

    let mut manager = MigrationManager::open(manifest, scripts_dir, config.migration_timeout())?;
    let pending = manager.pending().len();
    if pending == 0 {
        println!("{}", "[OK] All migrations have already run".green());
        return Ok(());
    }
    println!("[INFO] {} pending migration(s)", pending);

    let pb = spinner("Running migration scripts");
    let report = manager.run_all().await;
    pb.finish_and_clear();
    let report = report?;

    println!();
    for run in &report.runs {
        if run.success {
            println!("  {} {:08}", "[OK]".green(), run.id);
        } else {
            let reason = run
                .error
                .clone()
                .unwrap_or_else(|| format!("exit code {:?}", run.exit_code));
            println!("  {} {:08}: {}", "[FAIL]".red(), run.id, reason);
        }
    }
    println!();

    let failed = report.failed();
    if failed.is_empty() {
        println!(
            "{}",
            format!("[OK] {} migration(s) completed", report.runs.len()).green()
        );
    } else {
        println!(
            "{}",
            format!(
                "[WARNING] {} migration(s) failed and will be retried on the next run",
                failed.len()
            )
            .yellow()
        );
    }
    Ok(())
}
