//! External tool checks.

use super::CheckResult;
use crate::services::process::is_installed;

/// systemctl drives every service backup and restore.
pub fn check_systemctl() -> CheckResult {
    if is_installed("systemctl") {
        CheckResult::ok("systemctl", "installed")
    } else {
        CheckResult::warn(
            "systemctl",
            "not found",
            "Service state cannot be captured or restored on this host",
        )
    }
}

/// Database tools are only needed by modules that back up Postgres.
pub fn check_optional(program: &str, package: &str) -> CheckResult {
    if is_installed(program) {
        CheckResult::ok(program, "installed")
    } else {
        CheckResult::warn(
            program,
            "not found",
            &format!("Install it for Postgres backups: sudo apt install {}", package),
        )
    }
}
