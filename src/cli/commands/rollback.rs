//! Rollback command implementation.
//!
//! Reads an operation log and reverses the applied operations.

use crate::core::rollback::{
    build_rollback_plan, emergency_rollback, load_operation_log, RollbackManager, RollbackReport,
};
use crate::models::config::Config;
use crate::models::rollback::RollbackPlan;
use crate::Result;
use colored::Colorize;
use std::path::Path;

pub async fn rollback(log_file: &Path, emergency: bool, dry_run: bool, config: &Config) -> Result<()> {
    println!("{}", "[ROLLBACK] Rollback command".bold().cyan());
    println!();

    if !log_file.exists() {
        return Err(crate::Error::PathNotFound(log_file.display().to_string()));
    }

    println!("[INFO] Loading operation log: {}", log_file.display());
    let log = load_operation_log(log_file)?;
    println!("  {} {}", "Hotfix:".bold(), log.hotfix);
    println!("  {} {}", "Session:".bold(), log.session_id);
    println!("  {} {}", "Started at:".bold(), log.started_at);
    println!("  {} {}", "Operations:".bold(), log.operations.len());
    println!();

    if dry_run {
        println!("{}", "[DRY-RUN] Showing what would be done:".bold().yellow());
        println!();
        if emergency {
            for op in log.operations.iter().rev().filter(|o| o.applied) {
                println!("  {} {:?} {}", "undo".cyan(), op.op_type, op.operation_id);
            }
        } else {
            print_plan(&build_rollback_plan(&log.operations));
        }
        println!();
        println!("{}", "[OK] Dry run complete - no changes were made".green());
        return Ok(());
    }

    let report = if emergency {
        println!(
            "{}",
            "[WARNING] Emergency mode: no phase ordering, failures do not stop the walk"
                .bold()
                .yellow()
        );
        emergency_rollback(log_file)?
    } else {
        println!(
            "{}",
            "[WARNING] This will reverse all applied operations!".bold().yellow()
        );
        let plan = build_rollback_plan(&log.operations);
        RollbackManager::new(config).execute_rollback_plan(&plan).await
    };
    println!();

    print_summary(&report);
    println!();

    if report.is_success() {
        println!("{}", "[OK] Rollback completed successfully!".green());
    } else {
        println!("{}", "[WARNING] Rollback completed with errors".yellow());
    }
    report.into_result().map(|_| ())
}

fn print_plan(plan: &RollbackPlan) {
    if plan.is_empty() {
        println!("  Nothing to roll back");
        return;
    }
    for (phase, ops) in plan.phases.iter().rev() {
        println!("  {}", format!("Phase {}", phase).bold());
        for op in ops {
            let critical = if op.critical { " (critical)" } else { "" };
            println!(
                "    {} {:?} {}{}",
                "undo".cyan(),
                op.rollback_type,
                op.operation_id,
                critical
            );
        }
    }
}

fn print_summary(report: &RollbackReport) {
    println!("{}", "[Rollback Summary]".bold().green());
    println!("  {} {}", "Rolled back:".bold(), report.rolled_back.len());
    println!("  {} {}", "Skipped:".bold(), report.skipped.len());
    println!("  {} {}", "Failed:".bold(), report.failed.len());
    for failure in &report.failed {
        println!("    {} {}", "->".yellow(), failure);
    }
    if let Some(id) = &report.aborted_by {
        println!("  {} {}", "Aborted by critical step:".bold().red(), id);
    }
}
