//! Hotfix command implementation.

use crate::core::hotfix::{load_hotfix_plan, HotfixExecutor};
use crate::core::rollback::RollbackManager;
use crate::models::config::Config;
use crate::Result;
use colored::Colorize;
use std::path::Path;

pub async fn hotfix(plan_file: &Path, output: Option<&Path>, config: &Config) -> Result<()> {
    println!("{}", "[HOTFIX] Applying hotfix".bold().cyan());
    println!();

    if !plan_file.exists() {
        return Err(crate::Error::PathNotFound(plan_file.display().to_string()));
    }
    let plan = load_hotfix_plan(plan_file)?;
    println!("  {} {}", "Name:".bold(), plan.name);
    if !plan.description.is_empty() {
        println!("  {} {}", "Description:".bold(), plan.description);
    }
    println!("  {} {}", "Operations:".bold(), plan.operations.len());
    println!();

    let manager = RollbackManager::new(config);
    let mut executor = HotfixExecutor::new(&manager);
    if let Some(path) = output {
        executor = executor.with_log_path(path);
    }
    let result = executor.apply(&plan).await?;
    let log_path = result.log_path.clone();

    if !result.failed_operations.is_empty() {
        println!(
            "{}",
            format!(
                "[WARNING] {} non-critical operation(s) failed",
                result.failed_operations.len()
            )
            .yellow()
        );
        for failure in &result.failed_operations {
            println!("  {} {}", "->".yellow(), failure);
        }
    }

    if result.success {
        println!(
            "{}",
            format!("[OK] Applied {} operation(s)", result.log.operations.len()).green()
        );
        println!();
        println!("{}", "[Next Steps]".bold().cyan());
        println!("  To undo this hotfix:");
        println!(
            "     {}",
            format!("host-updater rollback {}", log_path.display()).bold()
        );
        return Ok(());
    }

    let error = result.error.clone().unwrap_or_default();
    println!("{}", format!("[FAIL] Hotfix failed: {}", error).red());
    if let Some(op) = &result.failed_operation {
        println!("  {} {}", "Operation:".bold(), op);
    }
    match &result.rollback {
        Some(report) if report.is_success() => {
            println!("{}", "[OK] Applied operations were rolled back".green());
        }
        Some(report) => {
            println!("{}", "[WARNING] Rollback completed with errors".yellow());
            for failure in &report.failed {
                println!("  {} {}", "->".yellow(), failure);
            }
        }
        None => {
            println!("[INFO] Automatic rollback is disabled for this hotfix");
        }
    }
    println!("  {} {}", "Operation log:".bold(), log_path.display());

    Err(crate::Error::ValidationFailed(error))
}
