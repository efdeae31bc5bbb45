//! Module backup data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Ownership and mode bits of a single file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePermissionInfo {
    pub path: PathBuf,
    /// Permission bits (including setuid/setgid/sticky).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Resolved user name, or the numeric uid when unknown.
    pub owner: String,
    /// Resolved group name, or the numeric gid when unknown.
    pub group: String,
}

/// Database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Sqlite,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Sqlite => "sqlite",
        }
    }

    /// Extension of the dump file inside a backup.
    pub fn dump_extension(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "sql",
            DatabaseKind::Sqlite => "sqlite",
        }
    }
}

/// A database to back up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub kind: DatabaseKind,
    /// Database name (Postgres) or a label (SQLite).
    pub name: String,
    /// Database file (SQLite only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl DatabaseSpec {
    pub fn postgres(name: impl Into<String>) -> Self {
        Self {
            kind: DatabaseKind::Postgres,
            name: name.into(),
            path: None,
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "sqlite".to_string());
        Self {
            kind: DatabaseKind::Sqlite,
            name,
            path: Some(path),
        }
    }
}

impl fmt::Display for DatabaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.path) {
            (DatabaseKind::Sqlite, Some(path)) => write!(f, "sqlite:{}", path.display()),
            (kind, _) => write!(f, "{}:{}", kind.as_str(), self.name),
        }
    }
}

/// A service's recorded state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub name: String,
    pub active: bool,
    pub enabled: bool,
}

/// What to protect before a module mutates the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupRequest {
    pub description: String,
    pub files: Vec<PathBuf>,
    pub services: Vec<String>,
    pub databases: Vec<DatabaseSpec>,
}

impl BackupRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.services.push(name.into());
        self
    }

    pub fn database(mut self, spec: DatabaseSpec) -> Self {
        self.databases.push(spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.services.is_empty() && self.databases.is_empty()
    }
}

/// The single backup slot of a module, as recorded in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleBackupInfo {
    pub module_name: String,
    pub timestamp: String,
    pub description: String,
    pub backup_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub services: Vec<String>,
    pub databases: Vec<DatabaseSpec>,
    pub checksum: String,
    pub file_permissions: Vec<FilePermissionInfo>,
}

/// Index file content: module name to its backup.
pub type ModuleBackupIndex = BTreeMap<String, ModuleBackupInfo>;
