//! Preflight checks module.

mod storage;
mod tools;
mod user;

use crate::models::config::Config;
use colored::Colorize;

/// Result of a preflight check.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub success: bool,
    /// A failed optional check is reported as a warning only.
    pub required: bool,
    pub message: String,
    pub hint: Option<String>,
}

impl CheckResult {
    pub fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            required: true,
            message: message.to_string(),
            hint: None,
        }
    }

    pub fn fail(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            required: true,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    pub fn warn(name: &str, message: &str, hint: &str) -> Self {
        Self {
            required: false,
            ..Self::fail(name, message, hint)
        }
    }
}

/// Run all preflight checks.
pub fn run_preflight_checks(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(tools::check_systemctl());
    results.push(tools::check_optional("pg_dump", "postgresql-client"));
    results.push(tools::check_optional("psql", "postgresql-client"));
    results.push(storage::check_writable("backup root", &config.backup_root));
    results.push(storage::check_writable("rollback root", &config.rollback_root()));
    results.push(user::check());

    results
}

/// Print preflight check results.
pub fn print_results(results: &[CheckResult]) {
    for result in results {
        if result.success {
            println!(
                "{} {}: {}",
                "[OK]".green(),
                result.name.bold(),
                result.message
            );
            continue;
        }

        let label = if result.required {
            "[FAIL]".red()
        } else {
            "[WARN]".yellow()
        };
        println!("{} {}: {}", label, result.name.bold(), result.message);
        if let Some(ref hint) = result.hint {
            println!("  {} {}", "->".yellow(), hint);
        }
    }
}

/// Check if all required preflight checks passed.
pub fn all_passed(results: &[CheckResult]) -> bool {
    results.iter().all(|r| r.success || !r.required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_do_not_fail_preflight() {
        let results = vec![
            CheckResult::ok("systemctl", "installed"),
            CheckResult::warn("pg_dump", "not found", "install it"),
        ];
        assert!(all_passed(&results));

        let results = vec![CheckResult::fail("backup root", "read-only", "fix it")];
        assert!(!all_passed(&results));
    }
}
