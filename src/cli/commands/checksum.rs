//! Checksum command implementation.

use crate::core::checksum::{compute_module_checksum, verify_module, write_checksum_file};
use crate::Result;
use colored::Colorize;
use std::path::Path;

/// Print (and optionally publish) a module's checksum.
pub fn compute(dir: &Path, write: bool) -> Result<()> {
    let checksum = if write {
        write_checksum_file(dir)?
    } else {
        compute_module_checksum(dir)?
    };

    println!("{}", checksum);
    if write {
        println!("{}", format!("[OK] Published checksum for {}", dir.display()).green());
    }
    Ok(())
}

/// Self-check a module against its published checksum.
pub fn verify(dir: &Path) -> Result<()> {
    let report = verify_module(dir)?;

    println!("  {} {}", "Published:".bold(), report.published);
    println!("  {} {}", "Computed: ".bold(), report.computed);
    println!();

    if report.is_valid() {
        println!("{}", "[OK] Module content matches its checksum".green());
        Ok(())
    } else {
        println!("{}", "[FAIL] Module content has changed since publishing".red());
        Err(crate::Error::ChecksumMismatch {
            module: dir.display().to_string(),
            expected: report.published,
            actual: report.computed,
        })
    }
}
