//! Per-module, single-slot backup and restore.
//!
//! Each module owns exactly one backup directory, `<root>/<module>_backup/`:
//! - `files/<original path without leading slash>`
//! - `services.json`
//! - `databases/db_<i>.{sql,sqlite}`
//!
//! The slot is recorded in a shared `backup_index.json`. Taking a new backup
//! clobbers the previous one.

use crate::core::checksum::{compute_tree_checksum, Exclusions};
use crate::core::permissions;
use crate::models::backup::{BackupRequest, ModuleBackupIndex, ModuleBackupInfo, ServiceState};
use crate::models::config::Config;
use crate::models::module::ModuleResult;
use crate::models::outcome::Outcome;
use crate::services::database::{DatabaseControl, DatabaseTools};
use crate::services::systemd::{ServiceControl, Systemctl};
use crate::utils::fs::{copy_any, mirrored_path, remove_any, write_atomic};
use crate::Result;
use chrono::Utc;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Index file name under the backup root.
pub const INDEX_FILE: &str = "backup_index.json";

const SERVICES_FILE: &str = "services.json";
const FILES_DIR: &str = "files";
const DATABASES_DIR: &str = "databases";
const SLOT_SUFFIX: &str = "_backup";

/// Serializes index read-modify-write between modules of one process.
static INDEX_LOCK: Mutex<()> = Mutex::new(());

/// What a backup call managed to capture.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub info: ModuleBackupInfo,
    pub files: Outcome,
    pub services: Outcome,
    pub databases: Outcome,
}

impl BackupReport {
    /// Some inputs could not be captured; a restore will be partial too.
    pub fn is_partial(&self) -> bool {
        !(self.files.is_complete() && self.services.is_complete() && self.databases.is_complete())
            || !self.files.skipped.is_empty()
    }
}

/// What a restore call managed to put back.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub files: Outcome,
    pub databases: Outcome,
    pub services: Outcome,
    pub permissions_restored: usize,
    pub permissions_total: usize,
}

impl RestoreReport {
    /// Every stage reported at least partial success.
    pub fn is_success(&self) -> bool {
        self.files.is_usable()
            && self.databases.is_usable()
            && self.services.is_usable()
            && (self.permissions_total == 0 || self.permissions_restored > 0)
    }
}

/// Single-slot backup store for modules.
pub struct StateManager {
    backup_root: PathBuf,
    services: Arc<dyn ServiceControl>,
    databases: Arc<dyn DatabaseControl>,
}

impl StateManager {
    /// Create a state manager using systemd and the standard database tools.
    pub fn new(config: &Config) -> Self {
        Self::with_collaborators(
            config.backup_root.clone(),
            Arc::new(Systemctl::new(config.command_timeout())),
            Arc::new(DatabaseTools::new(
                config.postgres_user.clone(),
                config.command_timeout(),
            )),
        )
    }

    /// Create a state manager with explicit service and database access.
    pub fn with_collaborators(
        backup_root: impl Into<PathBuf>,
        services: Arc<dyn ServiceControl>,
        databases: Arc<dyn DatabaseControl>,
    ) -> Self {
        Self {
            backup_root: backup_root.into(),
            services,
            databases,
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    fn index_path(&self) -> PathBuf {
        self.backup_root.join(INDEX_FILE)
    }

    /// Directory holding a module's backup slot.
    pub fn module_backup_dir(&self, module_name: &str) -> PathBuf {
        self.backup_root.join(format!("{}{}", module_name, SLOT_SUFFIX))
    }

    /// Back up files, services and databases for a module, replacing any
    /// previous backup of that module.
    ///
    /// Fails when there is nothing to back up or the slot cannot be created.
    /// Individual inputs that cannot be captured are reported in the result
    /// but do not fail the call.
    pub async fn backup_module_state(
        &self,
        module_name: &str,
        request: &BackupRequest,
    ) -> Result<BackupReport> {
        validate_module_name(module_name)?;
        if request.is_empty() {
            tracing::error!("No files, services or databases to back up for {}", module_name);
            return Err(crate::Error::BackupFailed {
                module: module_name.to_string(),
                reason: "nothing to back up".to_string(),
            });
        }

        let backup_dir = self.module_backup_dir(module_name);
        if backup_dir.exists() {
            tracing::info!("Replacing previous backup for {}", module_name);
            fs::remove_dir_all(&backup_dir).map_err(|e| crate::Error::BackupFailed {
                module: module_name.to_string(),
                reason: format!("cannot clear previous backup: {}", e),
            })?;
            self.update_index(|index| {
                index.remove(module_name);
            })?;
        }

        fs::create_dir_all(&backup_dir).map_err(|e| crate::Error::BackupFailed {
            module: module_name.to_string(),
            reason: format!("cannot create {}: {}", backup_dir.display(), e),
        })?;

        match self.write_backup(module_name, request, &backup_dir).await {
            Ok(report) => {
                if report.is_partial() {
                    tracing::warn!(
                        "Partial backup for {}: {} file(s), {} service(s), {} database(s) failed or missing",
                        module_name,
                        report.files.failed.len() + report.files.skipped.len(),
                        report.services.failed.len(),
                        report.databases.failed.len()
                    );
                } else {
                    tracing::info!("Backup complete for {}", module_name);
                }
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Backup for {} failed, discarding slot: {}", module_name, e);
                if let Err(cleanup) = remove_any(&backup_dir) {
                    tracing::warn!("Could not remove {:?}: {}", backup_dir, cleanup);
                }
                Err(crate::Error::BackupFailed {
                    module: module_name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn write_backup(
        &self,
        module_name: &str,
        request: &BackupRequest,
        backup_dir: &Path,
    ) -> Result<BackupReport> {
        let files = self.backup_files(&request.files, &backup_dir.join(FILES_DIR));
        let services = self.backup_services(&request.services, backup_dir).await;
        let databases = self.backup_databases(request, &backup_dir.join(DATABASES_DIR)).await;
        let file_permissions = permissions::capture(&request.files);
        let checksum = compute_tree_checksum(backup_dir, &Exclusions::none())?;

        let info = ModuleBackupInfo {
            module_name: module_name.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            description: request.description.clone(),
            backup_dir: backup_dir.to_path_buf(),
            files: request.files.clone(),
            services: request.services.clone(),
            databases: request.databases.clone(),
            checksum,
            file_permissions,
        };

        self.update_index(|index| {
            index.insert(module_name.to_string(), info.clone());
        })?;

        Ok(BackupReport {
            info,
            files,
            services,
            databases,
        })
    }

    fn backup_files(&self, files: &[PathBuf], files_root: &Path) -> Outcome {
        let mut outcome = Outcome::new();
        for file in files {
            let label = file.display().to_string();
            if file.symlink_metadata().is_err() {
                tracing::warn!("Backup source missing, skipping: {:?}", file);
                outcome.skip(label);
                continue;
            }
            match copy_any(file, &mirrored_path(files_root, file)) {
                Ok(()) => outcome.succeed(label),
                Err(e) => {
                    tracing::error!("Failed to back up {:?}: {}", file, e);
                    outcome.fail(label, e);
                }
            }
        }
        outcome
    }

    async fn backup_services(&self, names: &[String], backup_dir: &Path) -> Outcome {
        let mut outcome = Outcome::new();
        if names.is_empty() {
            return outcome;
        }

        let mut states = Vec::new();
        for name in names {
            match self.services.capture(name).await {
                Ok(state) => {
                    tracing::debug!(
                        "Service {}: active={}, enabled={}",
                        name,
                        state.active,
                        state.enabled
                    );
                    states.push(state);
                    outcome.succeed(name.clone());
                }
                Err(e) => {
                    tracing::error!("Failed to record state of service {}: {}", name, e);
                    outcome.fail(name.clone(), e);
                }
            }
        }

        let written = serde_json::to_string_pretty(&states)
            .map_err(crate::Error::from)
            .and_then(|json| {
                fs::write(backup_dir.join(SERVICES_FILE), json).map_err(crate::Error::from)
            });
        if let Err(e) = written {
            tracing::error!("Failed to write service states: {}", e);
            for name in std::mem::take(&mut outcome.succeeded) {
                outcome.fail(name, &e);
            }
        }
        outcome
    }

    async fn backup_databases(&self, request: &BackupRequest, db_root: &Path) -> Outcome {
        let mut outcome = Outcome::new();
        if request.databases.is_empty() {
            return outcome;
        }
        if let Err(e) = fs::create_dir_all(db_root) {
            for spec in &request.databases {
                outcome.fail(spec.to_string(), &e);
            }
            return outcome;
        }

        for (i, spec) in request.databases.iter().enumerate() {
            let dest = database_dump_path(db_root, i, spec.kind.dump_extension());
            match self.databases.dump(spec, &dest).await {
                Ok(()) => outcome.succeed(spec.to_string()),
                Err(e) => {
                    tracing::error!("Failed to dump database {}: {}", spec, e);
                    outcome.fail(spec.to_string(), e);
                }
            }
        }
        outcome
    }

    /// Restore a module's last backup.
    ///
    /// Order: stop services, restore files, restore databases, restore
    /// permissions, then bring services back to their recorded state. A
    /// failing stage does not stop the later ones.
    pub async fn restore_module_state(&self, module_name: &str) -> Result<RestoreReport> {
        let info = self
            .get_backup_info(module_name)?
            .ok_or_else(|| crate::Error::BackupNotFound(module_name.to_string()))?;
        if !info.backup_dir.exists() {
            tracing::error!("Backup directory missing for {}: {:?}", module_name, info.backup_dir);
            return Err(crate::Error::BackupNotFound(format!(
                "{} ({})",
                module_name,
                info.backup_dir.display()
            )));
        }

        tracing::info!("Restoring {} from backup taken {}", module_name, info.timestamp);
        let mut report = RestoreReport::default();

        for name in &info.services {
            if let Err(e) = self.services.stop(name).await {
                tracing::warn!("Could not stop {} before restore: {}", name, e);
            }
        }

        report.files = self.restore_files(&info);
        report.databases = self.restore_databases(&info).await;

        report.permissions_total = info.file_permissions.len();
        report.permissions_restored = permissions::restore(&info.file_permissions);

        report.services = self.restore_services(&info).await;

        if report.is_success() {
            tracing::info!("Restore of {} complete", module_name);
        } else {
            tracing::error!(
                "Restore of {} incomplete: files {:?}, databases {:?}, services {:?}, permissions {}/{}",
                module_name,
                report.files.failed,
                report.databases.failed,
                report.services.failed,
                report.permissions_restored,
                report.permissions_total
            );
        }
        Ok(report)
    }

    fn restore_files(&self, info: &ModuleBackupInfo) -> Outcome {
        let files_root = info.backup_dir.join(FILES_DIR);
        let mut outcome = Outcome::new();

        for file in &info.files {
            let label = file.display().to_string();
            let source = mirrored_path(&files_root, file);
            if source.symlink_metadata().is_err() {
                tracing::warn!("No backup copy of {:?}, skipping", file);
                outcome.skip(label);
                continue;
            }

            let result = remove_any(file).and_then(|_| copy_any(&source, file));
            match result {
                Ok(()) => {
                    tracing::debug!("Restored {:?}", file);
                    outcome.succeed(label);
                }
                Err(e) => {
                    tracing::error!("Failed to restore {:?}: {}", file, e);
                    outcome.fail(label, e);
                }
            }
        }
        outcome
    }

    async fn restore_databases(&self, info: &ModuleBackupInfo) -> Outcome {
        let db_root = info.backup_dir.join(DATABASES_DIR);
        let mut outcome = Outcome::new();

        for (i, spec) in info.databases.iter().enumerate() {
            let dump = database_dump_path(&db_root, i, spec.kind.dump_extension());
            if !dump.exists() {
                tracing::warn!("No dump for database {}, skipping", spec);
                outcome.skip(spec.to_string());
                continue;
            }
            match self.databases.restore(spec, &dump).await {
                Ok(()) => outcome.succeed(spec.to_string()),
                Err(e) => {
                    tracing::error!("Failed to restore database {}: {}", spec, e);
                    outcome.fail(spec.to_string(), e);
                }
            }
        }
        outcome
    }

    async fn restore_services(&self, info: &ModuleBackupInfo) -> Outcome {
        let mut outcome = Outcome::new();
        if info.services.is_empty() {
            return outcome;
        }

        let states: Vec<ServiceState> = match fs::read_to_string(info.backup_dir.join(SERVICES_FILE))
            .map_err(crate::Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(crate::Error::from))
        {
            Ok(states) => states,
            Err(e) => {
                tracing::error!("Cannot read recorded service states: {}", e);
                for name in &info.services {
                    outcome.fail(name.clone(), &e);
                }
                return outcome;
            }
        };

        for state in &states {
            match self.services.apply(state).await {
                Ok(()) => outcome.succeed(state.name.clone()),
                Err(e) => {
                    tracing::error!("Failed to restore service {}: {}", state.name, e);
                    outcome.fail(state.name.clone(), e);
                }
            }
        }
        outcome
    }

    /// Back up, run `update`, and restore if it fails.
    ///
    /// A failed backup aborts before `update` runs. The returned result carries
    /// a `restored` detail whenever a restore was attempted.
    pub async fn run_with_backup<F, Fut>(
        &self,
        module_name: &str,
        request: &BackupRequest,
        update: F,
    ) -> Result<ModuleResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModuleResult>>,
    {
        self.backup_module_state(module_name, request).await?;

        let result = match update().await {
            Ok(result) if result.success => return Ok(result),
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Update of {} failed: {}", module_name, e);
                ModuleResult::failed(e.to_string())
            }
        };

        tracing::warn!("Rolling back {} after failed update", module_name);
        let restored = match self.restore_module_state(module_name).await {
            Ok(report) => report.is_success(),
            Err(e) => {
                tracing::error!("Restore of {} failed: {}", module_name, e);
                false
            }
        };
        Ok(result.with_detail("restored", serde_json::Value::Bool(restored)))
    }

    /// Whether a module has a recorded backup whose directory still exists.
    pub fn has_backup(&self, module_name: &str) -> bool {
        matches!(self.get_backup_info(module_name), Ok(Some(info)) if info.backup_dir.exists())
    }

    /// Index entry for a module.
    pub fn get_backup_info(&self, module_name: &str) -> Result<Option<ModuleBackupInfo>> {
        Ok(self.load_index()?.remove(module_name))
    }

    /// All recorded module backups, sorted by module name.
    pub fn list_module_backups(&self) -> Result<Vec<ModuleBackupInfo>> {
        Ok(self.load_index()?.into_values().collect())
    }

    /// Drop a module's backup slot and index entry. Returns whether anything existed.
    pub fn remove_module_backup(&self, module_name: &str) -> Result<bool> {
        validate_module_name(module_name)?;
        let dir = self.module_backup_dir(module_name);
        let had_dir = dir.exists();
        remove_any(&dir)?;

        let mut had_entry = false;
        self.update_index(|index| {
            had_entry = index.remove(module_name).is_some();
        })?;

        if had_dir || had_entry {
            tracing::info!("Removed backup for {}", module_name);
        }
        Ok(had_dir || had_entry)
    }

    /// Remove `*_backup` directories that have no index entry.
    pub fn cleanup_orphaned_backups(&self) -> Result<Vec<String>> {
        if !self.backup_root.exists() {
            return Ok(Vec::new());
        }
        let index = self.load_index()?;
        let mut removed = Vec::new();

        for entry in fs::read_dir(&self.backup_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(module) = name.strip_suffix(SLOT_SUFFIX) else {
                continue;
            };
            if entry.file_type()?.is_dir() && !index.contains_key(module) {
                tracing::info!("Removing orphaned backup directory {:?}", entry.path());
                fs::remove_dir_all(entry.path())?;
                removed.push(module.to_string());
            }
        }
        removed.sort();
        Ok(removed)
    }

    fn load_index(&self) -> Result<ModuleBackupIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(ModuleBackupIndex::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(ModuleBackupIndex::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn update_index(&self, change: impl FnOnce(&mut ModuleBackupIndex)) -> Result<()> {
        let _guard = INDEX_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut index = self.load_index()?;
        change(&mut index);
        write_atomic(&self.index_path(), serde_json::to_string_pretty(&index)?.as_bytes())
    }
}

fn database_dump_path(db_root: &Path, index: usize, extension: &str) -> PathBuf {
    db_root.join(format!("db_{}.{}", index, extension))
}

fn validate_module_name(module_name: &str) -> Result<()> {
    if module_name.is_empty()
        || module_name.contains('/')
        || module_name == "."
        || module_name == ".."
    {
        return Err(crate::Error::BackupFailed {
            module: module_name.to_string(),
            reason: "invalid module name".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup::DatabaseSpec;
    use tempfile::TempDir;

    fn manager(root: &Path) -> StateManager {
        StateManager::with_collaborators(
            root.join("backups"),
            Arc::new(Systemctl::default()),
            Arc::new(DatabaseTools::default()),
        )
    }

    #[tokio::test]
    async fn test_empty_request_fails() {
        let temp_dir = TempDir::new().unwrap();
        let sm = manager(temp_dir.path());
        let err = sm
            .backup_module_state("demo", &BackupRequest::new("nothing"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::BackupFailed { .. }));
        assert!(!sm.module_backup_dir("demo").exists());
    }

    struct Running;

    #[async_trait::async_trait]
    impl ServiceControl for Running {
        async fn is_active(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
        async fn is_enabled(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
        async fn start(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn stop(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn enable(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn disable(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unwritable_service_states_are_failures() {
        let temp_dir = TempDir::new().unwrap();
        let sm = StateManager::with_collaborators(
            temp_dir.path().join("backups"),
            Arc::new(Running),
            Arc::new(DatabaseTools::default()),
        );

        let outcome = sm
            .backup_services(&["nginx".to_string()], &temp_dir.path().join("missing"))
            .await;

        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].starts_with("nginx: "));
    }

    #[tokio::test]
    async fn test_invalid_module_name() {
        let temp_dir = TempDir::new().unwrap();
        let sm = manager(temp_dir.path());
        let request = BackupRequest::new("x").file(temp_dir.path().join("a"));
        assert!(sm.backup_module_state("../etc", &request).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("present.conf");
        fs::write(&present, "v1").unwrap();
        let sm = manager(temp_dir.path());

        let request = BackupRequest::new("partial")
            .file(&present)
            .file(temp_dir.path().join("absent.conf"));
        let report = sm.backup_module_state("demo", &request).await.unwrap();

        assert!(report.is_partial());
        assert_eq!(report.files.succeeded.len(), 1);
        assert_eq!(report.files.skipped.len(), 1);
        assert!(sm.has_backup("demo"));
    }

    #[tokio::test]
    async fn test_sqlite_database_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("app.db");
        fs::write(&db, "rows-v1").unwrap();
        let sm = manager(temp_dir.path());

        let request = BackupRequest::new("db").database(DatabaseSpec::sqlite(&db));
        sm.backup_module_state("app", &request).await.unwrap();
        assert!(sm
            .module_backup_dir("app")
            .join("databases/db_0.sqlite")
            .exists());

        fs::write(&db, "rows-v2").unwrap();
        let report = sm.restore_module_state("app").await.unwrap();
        assert!(report.is_success());
        assert_eq!(fs::read_to_string(&db).unwrap(), "rows-v1");
    }

    #[tokio::test]
    async fn test_restore_without_backup() {
        let temp_dir = TempDir::new().unwrap();
        let sm = manager(temp_dir.path());
        assert!(matches!(
            sm.restore_module_state("ghost").await,
            Err(crate::Error::BackupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_and_orphan_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f");
        fs::write(&file, "x").unwrap();
        let sm = manager(temp_dir.path());
        sm.backup_module_state("keep", &BackupRequest::new("k").file(&file))
            .await
            .unwrap();
        sm.backup_module_state("drop", &BackupRequest::new("d").file(&file))
            .await
            .unwrap();
        fs::create_dir_all(sm.backup_root().join("stray_backup")).unwrap();

        assert!(sm.remove_module_backup("drop").unwrap());
        assert!(!sm.remove_module_backup("drop").unwrap());
        assert_eq!(sm.cleanup_orphaned_backups().unwrap(), vec!["stray".to_string()]);

        let names: Vec<_> = sm
            .list_module_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.module_name)
            .collect();
        assert_eq!(names, vec!["keep".to_string()]);
    }
}
