//! Run command implementation.

use super::spinner;
use crate::core::orchestrator::Orchestrator;
use crate::core::registry::ModuleRegistry;
use crate::models::config::Config;
use crate::Result;
use colored::Colorize;
use std::path::Path;

/// Discover modules and run a manifest.
pub async fn run(manifest: &Path, config: &Config) -> Result<()> {
    println!("{}", "[RUN] Running update manifest".bold().cyan());
    println!();

    let registry = ModuleRegistry::discover(&config.modules_dir, config.command_timeout())?;
    println!(
        "[INFO] {} module(s) available in {}",
        registry.len(),
        config.modules_dir.display()
    );

    let orchestrator = Orchestrator::new(registry, config);
    let pb = spinner(format!("Running {}", manifest.display()));
    let results = orchestrator.run_manifest(manifest).await;
    pb.finish_and_clear();
    let results = results?;

    println!();
    println!("{}", "[Update Summary]".bold().green());
    let mut failures = 0;
    for (module, result) in &results {
        match result {
            Some(r) if r.success => {
                let state = if r.updated { "updated" } else { "up to date" };
                println!("  {} {}: {}", "[OK]".green(), module.bold(), state);
                if let Some(msg) = r.message.as_deref().filter(|m| !m.is_empty()) {
                    println!("       {}", msg);
                }
            }
            Some(r) => {
                failures += 1;
                println!(
                    "  {} {}: {}",
                    "[FAIL]".red(),
                    module.bold(),
                    r.error.as_deref().unwrap_or("unknown error")
                );
            }
            None => {
                failures += 1;
                println!("  {} {}: no result (see log)", "[FAIL]".red(), module.bold());
            }
        }
    }
    println!();

    if failures == 0 {
        println!("{}", format!("[OK] {} module(s) completed", results.len()).green());
        Ok(())
    } else {
        println!(
            "{}",
            format!("[FAIL] {} of {} module(s) failed", failures, results.len()).red()
        );
        Err(crate::Error::UpdatesFailed {
            failed: failures,
            total: results.len(),
        })
    }
}
