//! Migration data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A one-shot, idempotent system change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub id: u32,
    pub description: String,
    #[serde(default)]
    pub has_run: bool,
}

impl Migration {
    /// Default script file name: the 8-digit zero-padded id.
    pub fn script_name(&self) -> String {
        format!("{:08}.sh", self.id)
    }

    pub fn category(&self) -> MigrationCategory {
        MigrationCategory::from_id(self.id)
    }
}

/// Migration manifest file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationManifest {
    /// Migrations in execution order.
    pub migrations: Vec<Migration>,
    /// Explicit id to script file mapping; ids without an entry use `<id>.sh`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
}

impl MigrationManifest {
    pub fn script_for(&self, migration: &Migration) -> String {
        self.scripts
            .get(&format!("{:08}", migration.id))
            .or_else(|| self.scripts.get(&migration.id.to_string()))
            .cloned()
            .unwrap_or_else(|| migration.script_name())
    }
}

/// Category conveyed by the id's leading digit (of 8).
///
/// A naming convention only; nothing enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationCategory {
    SystemInfrastructure,
    Service,
    Schema,
    Config,
    Security,
    Other,
}

impl MigrationCategory {
    pub fn from_id(id: u32) -> Self {
        match id / 10_000_000 {
            0 => MigrationCategory::SystemInfrastructure,
            1 => MigrationCategory::Service,
            2 => MigrationCategory::Schema,
            3 => MigrationCategory::Config,
            4 => MigrationCategory::Security,
            _ => MigrationCategory::Other,
        }
    }
}

impl fmt::Display for MigrationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationCategory::SystemInfrastructure => "system",
            MigrationCategory::Service => "service",
            MigrationCategory::Schema => "schema",
            MigrationCategory::Config => "config",
            MigrationCategory::Security => "security",
            MigrationCategory::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Captured execution of one migration script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRun {
    pub id: u32,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one manager invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Every migration that was attempted, in order.
    pub runs: Vec<MigrationRun>,
    /// Migrations skipped because they already ran.
    pub already_run: Vec<u32>,
}

impl MigrationReport {
    pub fn succeeded(&self) -> Vec<u32> {
        self.runs.iter().filter(|r| r.success).map(|r| r.id).collect()
    }

    pub fn failed(&self) -> Vec<u32> {
        self.runs.iter().filter(|r| !r.success).map(|r| r.id).collect()
    }

    pub fn is_success(&self) -> bool {
        self.runs.iter().all(|r| r.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_ranges() {
        assert_eq!(MigrationCategory::from_id(1), MigrationCategory::SystemInfrastructure);
        assert_eq!(MigrationCategory::from_id(10_000_001), MigrationCategory::Service);
        assert_eq!(MigrationCategory::from_id(20_000_000), MigrationCategory::Schema);
        assert_eq!(MigrationCategory::from_id(39_999_999), MigrationCategory::Config);
        assert_eq!(MigrationCategory::from_id(40_000_002), MigrationCategory::Security);
        assert_eq!(MigrationCategory::from_id(90_000_000), MigrationCategory::Other);
    }

    #[test]
    fn test_script_lookup() {
        let mut manifest = MigrationManifest::default();
        let m1 = Migration { id: 3, description: "a".into(), has_run: false };
        let m2 = Migration { id: 4, description: "b".into(), has_run: false };
        manifest.scripts.insert("00000004".into(), "custom.sh".into());

        assert_eq!(manifest.script_for(&m1), "00000003.sh");
        assert_eq!(manifest.script_for(&m2), "custom.sh");
    }
}
