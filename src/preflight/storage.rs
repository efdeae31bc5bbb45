//! Backup storage checks.

use super::CheckResult;
use std::fs;
use std::path::Path;

/// Check that `dir` exists (or can be created) and accepts writes.
pub fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(
            name,
            &format!("cannot create {}: {}", dir.display(), e),
            "Set backup_root in the config file or run as root",
        );
    }

    let probe = dir.join(".host_updater_probe");
    match fs::write(&probe, b"ok").and_then(|_| fs::remove_file(&probe)) {
        Ok(()) => CheckResult::ok(name, &format!("{} is writable", dir.display())),
        Err(e) => CheckResult::fail(
            name,
            &format!("{} is not writable: {}", dir.display(), e),
            "Set backup_root in the config file or run as root",
        ),
    }
}
