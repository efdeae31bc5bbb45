//! Configuration model.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for per-module backup slots.
    pub backup_root: PathBuf,
    /// Root for the typed snapshot store used by hotfixes.
    /// Defaults to `rollback/` under `backup_root`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_root: Option<PathBuf>,
    /// Directory scanned for update modules.
    pub modules_dir: PathBuf,
    /// Maximum number of modules executed concurrently.
    pub max_workers: usize,
    /// Timeout for a single external command, in seconds.
    pub command_timeout_secs: u64,
    /// Timeout for a single migration script, in seconds.
    pub migration_timeout_secs: u64,
    /// Role used for pg_dump / psql.
    pub postgres_user: String,
    /// Typed backups older than this are eligible for cleanup.
    pub backup_max_age_days: u64,
    /// Number of newest typed backups always kept.
    pub backup_keep_minimum: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_root: env_path("HOST_UPDATER_BACKUP_ROOT")
                .unwrap_or_else(|| PathBuf::from("/var/backups/host_updater")),
            rollback_root: None,
            modules_dir: env_path("HOST_UPDATER_MODULES_DIR")
                .unwrap_or_else(|| PathBuf::from("/opt/host_updater/modules")),
            max_workers: 4,
            command_timeout_secs: 300,
            migration_timeout_secs: 600,
            postgres_user: "postgres".to_string(),
            backup_max_age_days: 30,
            backup_keep_minimum: 5,
        }
    }
}

impl Config {
    pub fn rollback_root(&self) -> PathBuf {
        self.rollback_root
            .clone()
            .unwrap_or_else(|| self.backup_root.join("rollback"))
    }

    /// Per-command timeout as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Per-migration timeout as a `Duration`.
    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_secs)
    }

    /// Configuration rooted in a scratch directory. Handy for tests and dry runs.
    pub fn with_root(root: &Path) -> Self {
        Self {
            backup_root: root.join("backups"),
            rollback_root: Some(root.join("rollback")),
            modules_dir: root.join("modules"),
            ..Self::default()
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key).map(PathBuf::from)
}

/// Get the configuration directory path.
fn dirs_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("host_updater")
}

/// Load configuration from the default location.
pub fn load_config() -> Config {
    load_config_from(&dirs_config_path().join("config.toml"))
}

/// Load configuration from a specific file, falling back to defaults.
pub fn load_config_from(config_path: &Path) -> Config {
    if config_path.exists() {
        match std::fs::read_to_string(config_path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Ignoring invalid config {:?}: {}", config_path, e),
            },
            Err(e) => tracing::warn!("Cannot read config {:?}: {}", config_path, e),
        }
    }

    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "max_workers = 8\nbackup_root = \"/srv/backups\"\n").unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.backup_root, PathBuf::from("/srv/backups"));
        assert_eq!(config.rollback_root(), PathBuf::from("/srv/backups/rollback"));
        assert_eq!(config.migration_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "max_workers = \"many\"").unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn test_explicit_rollback_root() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "backup_root = \"/srv/backups\"\nrollback_root = \"/srv/undo\"\n").unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.rollback_root(), PathBuf::from("/srv/undo"));
    }
}
