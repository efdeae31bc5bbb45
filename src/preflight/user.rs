//! Privilege check.

use super::CheckResult;

/// Restoring ownership and system files needs root.
pub fn check() -> CheckResult {
    let user = whoami::username();
    if user == "root" {
        CheckResult::ok("user", "running as root")
    } else {
        CheckResult::warn(
            "user",
            &format!("running as {}", user),
            "Ownership restore and system paths require root; re-run with sudo",
        )
    }
}
