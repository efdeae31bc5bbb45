//! Typed backup store and phase-ordered rollback.
//!
//! Unlike the single-slot module backups, the typed store keeps any number of
//! file, service and database backups plus point-in-time snapshots:
//!
//! ```text
//! <root>/backup_index.json
//! <root>/backups/<backup_id>/...
//! <root>/snapshot_index.json
//! <root>/snapshots/<snapshot_id>/...
//! ```
//!
//! Rollback plans undo applied forward operations phase by phase, highest
//! phase first. A failing critical step aborts the plan.

use crate::core::checksum::{compute_tree_checksum, content_id, Exclusions};
use crate::core::markers::{self, VerifiedRemoval};
use crate::core::permissions;
use crate::models::backup::{DatabaseSpec, FilePermissionInfo, ServiceState};
use crate::models::config::Config;
use crate::models::outcome::Outcome;
use crate::models::rollback::{
    ForwardOpType, ForwardOperation, OperationLog, RollbackOperation, RollbackPlan, RollbackType,
};
use crate::models::snapshot::{
    BackupIndex, BackupInfo, BackupType, SnapshotIndex, SnapshotTarget, StateSnapshot,
};
use crate::services::database::{DatabaseControl, DatabaseTools};
use crate::services::process::run_checked;
use crate::services::systemd::{ServiceControl, Systemctl};
use crate::utils::fs::{copy_any, mirrored_path, remove_any, write_atomic};
use crate::Result;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BACKUP_INDEX_FILE: &str = "backup_index.json";
const SNAPSHOT_INDEX_FILE: &str = "snapshot_index.json";
const BACKUPS_DIR: &str = "backups";
const SNAPSHOTS_DIR: &str = "snapshots";
const SERVICES_FILE: &str = "services.json";
const PERMISSIONS_FILE: &str = "permissions.json";

/// Result of executing a rollback plan or an emergency rollback.
#[derive(Debug, Clone, Default)]
pub struct RollbackReport {
    /// Operation ids undone, in execution order.
    pub rolled_back: Vec<String>,
    /// Operation ids whose undo failed, with the reason.
    pub failed: Vec<String>,
    /// Operation ids with nothing to undo.
    pub skipped: Vec<String>,
    /// Critical operation whose failure stopped the plan.
    pub aborted_by: Option<String>,
}

impl RollbackReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted_by.is_none()
    }

    /// Turn a critical abort into `Error::CriticalRollback`.
    pub fn into_result(self) -> Result<Self> {
        match &self.aborted_by {
            Some(id) => Err(crate::Error::CriticalRollback(id.clone())),
            None => Ok(self),
        }
    }
}

/// What a single rollback step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepResult {
    Done,
    NothingToDo,
}

/// Typed backup/snapshot store and rollback executor.
pub struct RollbackManager {
    root: PathBuf,
    services: Arc<dyn ServiceControl>,
    databases: Arc<dyn DatabaseControl>,
    script_timeout: Duration,
}

impl RollbackManager {
    /// Create a manager using systemd and the standard database tools.
    pub fn new(config: &Config) -> Self {
        Self::with_collaborators(
            config.rollback_root(),
            Arc::new(Systemctl::new(config.command_timeout())),
            Arc::new(DatabaseTools::new(
                config.postgres_user.clone(),
                config.command_timeout(),
            )),
            config.command_timeout(),
        )
    }

    pub fn with_collaborators(
        root: impl Into<PathBuf>,
        services: Arc<dyn ServiceControl>,
        databases: Arc<dyn DatabaseControl>,
        script_timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            services,
            databases,
            script_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn script_timeout(&self) -> Duration {
        self.script_timeout
    }

    // ========== TYPED BACKUPS ==========

    /// Copy a file or directory into a new backup.
    pub async fn backup_file(&self, path: &Path, description: &str) -> Result<BackupInfo> {
        if path.symlink_metadata().is_err() {
            return Err(crate::Error::PathNotFound(path.display().to_string()));
        }

        let source = path.display().to_string();
        let (backup_id, timestamp) = self.new_id(BACKUPS_DIR, &["file", &source], &self.load_backup_index()?);
        let dir = self.root.join(BACKUPS_DIR).join(&backup_id);
        let name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "root".into());
        let backup_path = dir.join(name);

        let result = copy_any(path, &backup_path)
            .and_then(|_| compute_tree_checksum(&backup_path, &Exclusions::none()));
        let checksum = match result {
            Ok(checksum) => checksum,
            Err(e) => {
                let _ = remove_any(&dir);
                return Err(e);
            }
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("is_dir".to_string(), json!(path.is_dir()));
        let info = BackupInfo {
            backup_id,
            timestamp,
            backup_type: BackupType::File,
            description: description.to_string(),
            source_path: source,
            backup_path,
            metadata,
            checksum,
        };
        self.record_backup(&info)?;
        tracing::info!("Backed up {:?} as {}", path, info.backup_id);
        Ok(info)
    }

    /// Record active/enabled state of services into a new backup.
    pub async fn backup_services(&self, names: &[String], description: &str) -> Result<BackupInfo> {
        let source = names.join(",");
        let (backup_id, timestamp) =
            self.new_id(BACKUPS_DIR, &["service", &source], &self.load_backup_index()?);
        let dir = self.root.join(BACKUPS_DIR).join(&backup_id);
        fs::create_dir_all(&dir)?;

        let mut states = Vec::new();
        for name in names {
            match self.services.capture(name).await {
                Ok(state) => states.push(state),
                Err(e) => {
                    let _ = remove_any(&dir);
                    return Err(e);
                }
            }
        }

        let backup_path = dir.join(SERVICES_FILE);
        fs::write(&backup_path, serde_json::to_string_pretty(&states)?)?;
        let info = BackupInfo {
            backup_id,
            timestamp,
            backup_type: BackupType::Service,
            description: description.to_string(),
            source_path: source,
            checksum: compute_tree_checksum(&backup_path, &Exclusions::none())?,
            backup_path,
            metadata: BTreeMap::new(),
        };
        self.record_backup(&info)?;
        tracing::info!("Backed up service state for [{}] as {}", info.source_path, info.backup_id);
        Ok(info)
    }

    /// Dump a database into a new backup.
    pub async fn backup_database(&self, spec: &DatabaseSpec, description: &str) -> Result<BackupInfo> {
        let source = spec.to_string();
        let (backup_id, timestamp) =
            self.new_id(BACKUPS_DIR, &["database", &source], &self.load_backup_index()?);
        let dir = self.root.join(BACKUPS_DIR).join(&backup_id);
        fs::create_dir_all(&dir)?;

        let backup_path = dir.join(format!("db.{}", spec.kind.dump_extension()));
        if let Err(e) = self.databases.dump(spec, &backup_path).await {
            let _ = remove_any(&dir);
            return Err(e);
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("database".to_string(), serde_json::to_value(spec)?);
        let info = BackupInfo {
            backup_id,
            timestamp,
            backup_type: BackupType::Database,
            description: description.to_string(),
            source_path: source,
            checksum: compute_tree_checksum(&backup_path, &Exclusions::none())?,
            backup_path,
            metadata,
        };
        self.record_backup(&info)?;
        tracing::info!("Backed up database {} as {}", info.source_path, info.backup_id);
        Ok(info)
    }

    /// Put a typed backup back in place.
    ///
    /// The backup content is checked against its recorded checksum first.
    pub async fn restore_backup(&self, backup_id: &str) -> Result<()> {
        let info = self
            .get_backup(backup_id)?
            .ok_or_else(|| crate::Error::BackupNotFound(backup_id.to_string()))?;

        if !info.backup_path.exists() {
            return Err(crate::Error::BackupNotFound(format!(
                "{} ({})",
                backup_id,
                info.backup_path.display()
            )));
        }
        let current = compute_tree_checksum(&info.backup_path, &Exclusions::none())?;
        if current != info.checksum {
            return Err(crate::Error::RestoreFailed(format!(
                "backup {} is corrupted (checksum {} != {})",
                backup_id, current, info.checksum
            )));
        }

        match info.backup_type {
            BackupType::File => {
                let target = PathBuf::from(&info.source_path);
                remove_any(&target)?;
                copy_any(&info.backup_path, &target)?;
            }
            BackupType::Service => {
                let states: Vec<ServiceState> =
                    serde_json::from_str(&fs::read_to_string(&info.backup_path)?)?;
                for state in &states {
                    self.services.apply(state).await?;
                }
            }
            BackupType::Database => {
                let spec: DatabaseSpec = info
                    .metadata
                    .get("database")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()?
                    .ok_or_else(|| {
                        crate::Error::RestoreFailed(format!("backup {} has no database spec", backup_id))
                    })?;
                self.databases.restore(&spec, &info.backup_path).await?;
            }
            BackupType::System => {
                return Err(crate::Error::RestoreFailed(format!(
                    "backup {} is a system capture; restore it as a snapshot",
                    backup_id
                )));
            }
        }

        tracing::info!("Restored backup {} ({})", backup_id, info.source_path);
        Ok(())
    }

    pub fn get_backup(&self, backup_id: &str) -> Result<Option<BackupInfo>> {
        Ok(self.load_backup_index()?.remove(backup_id))
    }

    /// All typed backups, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let mut backups: Vec<_> = self.load_backup_index()?.into_values().collect();
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.backup_id.cmp(&b.backup_id)));
        Ok(backups)
    }

    /// Remove backups older than `max_age_days`, always keeping the newest
    /// `keep_minimum`. Returns the removed ids.
    pub fn cleanup_old_backups(&self, max_age_days: u64, keep_minimum: usize) -> Result<Vec<String>> {
        let cutoff = Utc::now() - ChronoDuration::days(max_age_days as i64);
        let expired: Vec<String> = self
            .list_backups()?
            .into_iter()
            .skip(keep_minimum)
            .filter(|b| is_older_than(&b.timestamp, cutoff))
            .map(|b| b.backup_id)
            .collect();

        if expired.is_empty() {
            return Ok(expired);
        }

        for id in &expired {
            remove_any(&self.root.join(BACKUPS_DIR).join(id))?;
        }
        let mut index = self.load_backup_index()?;
        for id in &expired {
            index.remove(id);
        }
        self.save_index(BACKUP_INDEX_FILE, &index)?;

        tracing::info!("Removed {} expired backup(s)", expired.len());
        Ok(expired)
    }

    // ========== SNAPSHOTS ==========

    /// Capture a point-in-time snapshot.
    pub async fn create_snapshot(
        &self,
        description: &str,
        target: &SnapshotTarget,
    ) -> Result<StateSnapshot> {
        let kind = format!("{:?}", target.snapshot_type());
        let (snapshot_id, timestamp) =
            self.new_id(SNAPSHOTS_DIR, &["snapshot", &kind, description], &self.load_snapshot_index()?);
        let data_path = self.root.join(SNAPSHOTS_DIR).join(&snapshot_id);
        fs::create_dir_all(&data_path)?;

        let metadata = match self.capture_snapshot_data(target, &data_path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::error!("Snapshot {} failed: {}", snapshot_id, e);
                let _ = remove_any(&data_path);
                return Err(e);
            }
        };

        let snapshot = StateSnapshot {
            snapshot_id,
            timestamp,
            description: description.to_string(),
            snapshot_type: target.snapshot_type(),
            checksum: compute_tree_checksum(&data_path, &Exclusions::none())?,
            data_path,
            metadata,
        };

        let mut index = self.load_snapshot_index()?;
        index.insert(snapshot.snapshot_id.clone(), snapshot.clone());
        self.save_index(SNAPSHOT_INDEX_FILE, &index)?;
        tracing::info!("Created snapshot {} ({})", snapshot.snapshot_id, description);
        Ok(snapshot)
    }

    async fn capture_snapshot_data(
        &self,
        target: &SnapshotTarget,
        data_path: &Path,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let mut metadata = BTreeMap::new();
        let (paths, services, database): (&[PathBuf], &[String], Option<&DatabaseSpec>) = match target {
            SnapshotTarget::Files { paths } => (paths, &[], None),
            SnapshotTarget::Services { names } => (&[], names, None),
            SnapshotTarget::Database { spec } => (&[], &[], Some(spec)),
            SnapshotTarget::System { paths, services } => (paths, services, None),
        };

        if !paths.is_empty() {
            let files_root = data_path.join("files");
            let mut present = Vec::new();
            let mut absent = Vec::new();
            for path in paths {
                if path.symlink_metadata().is_ok() {
                    copy_any(path, &mirrored_path(&files_root, path))?;
                    present.push(path.clone());
                } else {
                    absent.push(path.clone());
                }
            }
            let perms = permissions::capture(&present);
            fs::write(data_path.join(PERMISSIONS_FILE), serde_json::to_string_pretty(&perms)?)?;
            metadata.insert("paths".to_string(), serde_json::to_value(&present)?);
            metadata.insert("absent_paths".to_string(), serde_json::to_value(&absent)?);
        }

        if !services.is_empty() {
            let mut states = Vec::new();
            for name in services {
                states.push(self.services.capture(name).await?);
            }
            fs::write(data_path.join(SERVICES_FILE), serde_json::to_string_pretty(&states)?)?;
            metadata.insert("services".to_string(), serde_json::to_value(services)?);
        }

        if let Some(spec) = database {
            let dump = data_path.join(format!("db.{}", spec.kind.dump_extension()));
            self.databases.dump(spec, &dump).await?;
            metadata.insert("database".to_string(), serde_json::to_value(spec)?);
        }

        Ok(metadata)
    }

    /// Restore everything a snapshot captured.
    ///
    /// Paths that did not exist at capture time are removed. Each item is
    /// best-effort; the outcome lists what failed.
    pub async fn restore_snapshot(&self, snapshot_id: &str) -> Result<Outcome> {
        let snapshot = self
            .get_snapshot(snapshot_id)?
            .ok_or_else(|| crate::Error::BackupNotFound(snapshot_id.to_string()))?;
        if !snapshot.data_path.exists() {
            return Err(crate::Error::BackupNotFound(format!(
                "snapshot {} ({})",
                snapshot_id,
                snapshot.data_path.display()
            )));
        }

        let mut outcome = Outcome::new();
        let files_root = snapshot.data_path.join("files");

        for path in metadata_paths(&snapshot, "paths") {
            let label = path.display().to_string();
            let source = mirrored_path(&files_root, &path);
            match remove_any(&path).and_then(|_| copy_any(&source, &path)) {
                Ok(()) => outcome.succeed(label),
                Err(e) => {
                    tracing::error!("Snapshot restore of {:?} failed: {}", path, e);
                    outcome.fail(label, e);
                }
            }
        }
        for path in metadata_paths(&snapshot, "absent_paths") {
            let label = path.display().to_string();
            match remove_any(&path) {
                Ok(()) => outcome.succeed(label),
                Err(e) => outcome.fail(label, e),
            }
        }

        let perms_file = snapshot.data_path.join(PERMISSIONS_FILE);
        if perms_file.exists() {
            let perms: Vec<FilePermissionInfo> =
                serde_json::from_str(&fs::read_to_string(&perms_file)?)?;
            permissions::restore(&perms);
        }

        let services_file = snapshot.data_path.join(SERVICES_FILE);
        if services_file.exists() {
            let states: Vec<ServiceState> =
                serde_json::from_str(&fs::read_to_string(&services_file)?)?;
            for state in &states {
                match self.services.apply(state).await {
                    Ok(()) => outcome.succeed(state.name.clone()),
                    Err(e) => outcome.fail(state.name.clone(), e),
                }
            }
        }

        if let Some(value) = snapshot.metadata.get("database") {
            let spec: DatabaseSpec = serde_json::from_value(value.clone())?;
            let dump = snapshot
                .data_path
                .join(format!("db.{}", spec.kind.dump_extension()));
            match self.databases.restore(&spec, &dump).await {
                Ok(()) => outcome.succeed(spec.to_string()),
                Err(e) => outcome.fail(spec.to_string(), e),
            }
        }

        tracing::info!(
            "Restored snapshot {}: {} ok, {} failed",
            snapshot_id,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<StateSnapshot>> {
        Ok(self.load_snapshot_index()?.remove(snapshot_id))
    }

    /// All snapshots, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<StateSnapshot>> {
        let mut snapshots: Vec<_> = self.load_snapshot_index()?.into_values().collect();
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(snapshots)
    }

    pub fn remove_snapshot(&self, snapshot_id: &str) -> Result<bool> {
        let mut index = self.load_snapshot_index()?;
        let Some(snapshot) = index.remove(snapshot_id) else {
            return Ok(false);
        };
        remove_any(&snapshot.data_path)?;
        self.save_index(SNAPSHOT_INDEX_FILE, &index)?;
        Ok(true)
    }

    // ========== ROLLBACK PLANS ==========

    /// Execute a rollback plan, highest phase first.
    ///
    /// A failing critical step stops the plan immediately; the host may be
    /// left partially rolled back. Non-critical failures are logged and the
    /// plan continues.
    pub async fn execute_rollback_plan(&self, plan: &RollbackPlan) -> RollbackReport {
        let mut report = RollbackReport::default();
        tracing::info!("Executing rollback plan with {} step(s)", plan.len());

        for (phase, ops) in plan.phases.iter().rev() {
            tracing::info!("Rolling back phase {} ({} step(s))", phase, ops.len());
            for op in ops {
                match self.execute_rollback_op(op).await {
                    Ok(StepResult::Done) => {
                        tracing::debug!("Rolled back {}", op.operation_id);
                        report.rolled_back.push(op.operation_id.clone());
                    }
                    Ok(StepResult::NothingToDo) => report.skipped.push(op.operation_id.clone()),
                    Err(e) if op.critical => {
                        tracing::error!(
                            "Critical rollback of {} failed, aborting plan: {}",
                            op.operation_id,
                            e
                        );
                        report.failed.push(format!("{}: {}", op.operation_id, e));
                        report.aborted_by = Some(op.operation_id.clone());
                        return report;
                    }
                    Err(e) => {
                        tracing::warn!("Rollback of {} failed, continuing: {}", op.operation_id, e);
                        report.failed.push(format!("{}: {}", op.operation_id, e));
                    }
                }
            }
        }

        report
    }

    async fn execute_rollback_op(&self, op: &RollbackOperation) -> Result<StepResult> {
        match op.rollback_type {
            RollbackType::RestoreBackup => {
                let target = required_target(op)?;
                if let Some(link) = op.metadata.get("previous_link").and_then(|v| v.as_str()) {
                    restore_symlink(target, Path::new(link))?;
                    return Ok(StepResult::Done);
                }
                match &op.source_path {
                    Some(source) => {
                        if !source.exists() {
                            return Err(crate::Error::BackupNotFound(source.display().to_string()));
                        }
                        remove_any(target)?;
                        copy_any(source, target)?;
                        Ok(StepResult::Done)
                    }
                    None if target.symlink_metadata().is_ok() => {
                        remove_any(target)?;
                        Ok(StepResult::Done)
                    }
                    None => Ok(StepResult::NothingToDo),
                }
            }
            RollbackType::RemoveAppend => {
                let target = required_target(op)?;
                if !target.exists() {
                    return Ok(StepResult::NothingToDo);
                }
                let content = fs::read_to_string(target)?;
                let hash = op.metadata.get("appended_hash").and_then(|v| v.as_str());
                let updated = match hash {
                    Some(hash) => match markers::remove_block_verified(&content, &op.operation_id, hash) {
                        VerifiedRemoval::Removed(text) => Some(text),
                        VerifiedRemoval::NotFound => None,
                        VerifiedRemoval::HashMismatch { found } => {
                            return Err(crate::Error::RestoreFailed(format!(
                                "appended block in {} was modified (hash {})",
                                target.display(),
                                found
                            )));
                        }
                    },
                    None => markers::remove_block(&content, &op.operation_id),
                };
                match updated {
                    Some(text) => {
                        let flag = |key: &str, default: bool| {
                            op.metadata.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
                        };
                        write_after_removal(
                            target,
                            text,
                            flag("separator_added", false),
                            flag("target_existed", true),
                        )?;
                        Ok(StepResult::Done)
                    }
                    None => Ok(StepResult::NothingToDo),
                }
            }
            RollbackType::ExecuteScript => {
                let script = op.rollback_script.as_ref().ok_or_else(|| {
                    crate::Error::RestoreFailed(format!("{} has no rollback script", op.operation_id))
                })?;
                let output = run_checked(script, &[] as &[&str], self.script_timeout).await?;
                if !output.stdout.trim().is_empty() {
                    tracing::info!("[{}] {}", op.operation_id, output.stdout.trim());
                }
                Ok(StepResult::Done)
            }
            RollbackType::RestoreState => {
                let id = op.state_snapshot_id.as_deref().ok_or_else(|| {
                    crate::Error::RestoreFailed(format!("{} has no snapshot", op.operation_id))
                })?;
                let outcome = self.restore_snapshot(id).await?;
                if outcome.is_complete() {
                    Ok(StepResult::Done)
                } else {
                    Err(crate::Error::RestoreFailed(outcome.failed.join("; ")))
                }
            }
        }
    }

    // ========== INDEX HELPERS ==========

    /// A fresh id that is neither in `existing` nor a directory under `store`.
    fn new_id<T>(
        &self,
        store: &str,
        parts: &[&str],
        existing: &BTreeMap<String, T>,
    ) -> (String, String) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let dir = self.root.join(store);
        let id = unique_id(parts, &timestamp, |id| {
            existing.contains_key(id) || dir.join(id).exists()
        });
        (id, timestamp)
    }

    fn record_backup(&self, info: &BackupInfo) -> Result<()> {
        let mut index = self.load_backup_index()?;
        index.insert(info.backup_id.clone(), info.clone());
        self.save_index(BACKUP_INDEX_FILE, &index)
    }

    fn load_backup_index(&self) -> Result<BackupIndex> {
        load_index(&self.root.join(BACKUP_INDEX_FILE))
    }

    fn load_snapshot_index(&self) -> Result<SnapshotIndex> {
        load_index(&self.root.join(SNAPSHOT_INDEX_FILE))
    }

    fn save_index<T: serde::Serialize>(&self, name: &str, index: &T) -> Result<()> {
        write_atomic(&self.root.join(name), serde_json::to_string_pretty(index)?.as_bytes())
    }
}

fn load_index<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Hash `parts` and `timestamp`, bumping a salt until `taken` rejects the id.
fn unique_id(parts: &[&str], timestamp: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut salt = 0u32;
    loop {
        let salt_str = salt.to_string();
        let mut all: Vec<&str> = parts.to_vec();
        all.push(timestamp);
        all.push(&salt_str);
        let id = content_id(&all);
        if !taken(&id) {
            return id;
        }
        salt += 1;
    }
}

fn is_older_than(timestamp: &str, cutoff: DateTime<Utc>) -> bool {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc) < cutoff)
        .unwrap_or(false)
}

fn metadata_paths(snapshot: &StateSnapshot, key: &str) -> Vec<PathBuf> {
    snapshot
        .metadata
        .get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn required_target(op: &RollbackOperation) -> Result<&Path> {
    op.target_path
        .as_deref()
        .ok_or_else(|| crate::Error::RestoreFailed(format!("{} has no target path", op.operation_id)))
}

/// Write back a file whose appended block was removed, or delete it when
/// the append created it.
fn write_after_removal(
    target: &Path,
    text: String,
    separator_added: bool,
    target_existed: bool,
) -> Result<()> {
    match markers::undo_separator(text, separator_added, target_existed) {
        Some(text) => fs::write(target, text)?,
        None => fs::remove_file(target)?,
    }
    Ok(())
}

fn restore_symlink(target: &Path, previous: &Path) -> Result<()> {
    remove_any(target)?;
    std::os::unix::fs::symlink(previous, target)?;
    Ok(())
}

// ========== PLAN BUILDING ==========

/// Derive the undo step for an applied forward operation.
///
/// Returns `None` for operations with nothing to undo (not applied, or an
/// execute step without a rollback script).
pub fn rollback_for(op: &ForwardOperation) -> Option<RollbackOperation> {
    if !op.applied {
        return None;
    }

    let mut metadata = BTreeMap::new();
    let (rollback_type, source_path) = match op.op_type {
        ForwardOpType::Copy | ForwardOpType::Symlink => {
            if let Some(link) = &op.previous_link {
                metadata.insert("previous_link".to_string(), json!(link));
            }
            (RollbackType::RestoreBackup, op.backup_path.clone())
        }
        ForwardOpType::Append => {
            if let Some(hash) = &op.appended_hash {
                metadata.insert("appended_hash".to_string(), json!(hash));
            }
            metadata.insert("separator_added".to_string(), json!(op.separator_added));
            metadata.insert("target_existed".to_string(), json!(op.target_existed));
            (RollbackType::RemoveAppend, None)
        }
        ForwardOpType::Execute => {
            op.rollback_script.as_ref()?;
            (RollbackType::ExecuteScript, None)
        }
        ForwardOpType::CaptureState => {
            op.snapshot_id.as_ref()?;
            (RollbackType::RestoreState, None)
        }
    };
    if let Some(id) = &op.backup_id {
        metadata.insert("backup_id".to_string(), json!(id));
    }

    Some(RollbackOperation {
        operation_id: op.operation_id.clone(),
        rollback_type,
        source_path,
        target_path: op.target.clone(),
        rollback_script: op.rollback_script.clone(),
        state_snapshot_id: op.snapshot_id.clone(),
        dependencies: op.dependencies.clone(),
        phase: op.phase,
        critical: op.critical,
        metadata,
    })
}

/// Build a rollback plan from applied forward operations.
///
/// Within a phase, an operation is undone before the operations it depends
/// on; otherwise steps are ordered by operation id.
pub fn build_rollback_plan(ops: &[ForwardOperation]) -> RollbackPlan {
    let mut grouped: BTreeMap<i32, Vec<RollbackOperation>> = BTreeMap::new();
    for op in ops {
        if let Some(rb) = rollback_for(op) {
            grouped.entry(rb.phase).or_default().push(rb);
        } else if op.applied {
            tracing::warn!("Operation {} is not reversible", op.operation_id);
        }
    }

    let phases = grouped
        .into_iter()
        .map(|(phase, ops)| {
            let nodes: Vec<(String, Vec<String>)> = ops
                .iter()
                .map(|o| (o.operation_id.clone(), o.dependencies.clone()))
                .collect();
            let order = dependency_order(&nodes, false);
            let mut by_id: BTreeMap<String, RollbackOperation> =
                ops.into_iter().map(|o| (o.operation_id.clone(), o)).collect();
            let sorted = order.iter().filter_map(|id| by_id.remove(id)).collect();
            (phase, sorted)
        })
        .collect();

    RollbackPlan { phases }
}

/// Order ids so that dependencies come first (`deps_first`) or last.
///
/// Dependencies on ids outside `nodes` are ignored. Ties break by id. Cycles
/// are broken by id with a warning.
pub(crate) fn dependency_order(nodes: &[(String, Vec<String>)], deps_first: bool) -> Vec<String> {
    let ids: BTreeSet<&str> = nodes.iter().map(|(id, _)| id.as_str()).collect();
    // edges[a] = ids that must come after a
    let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut indegree: BTreeMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();

    for (id, deps) in nodes {
        for dep in deps.iter().filter(|d| ids.contains(d.as_str()) && *d != id) {
            let (before, after) = if deps_first {
                (dep.as_str(), id.as_str())
            } else {
                (id.as_str(), dep.as_str())
            };
            edges.entry(before).or_default().push(after);
            *indegree.entry(after).or_default() += 1;
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for next in edges.get(id).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*next);
                }
            }
        }
    }

    if order.len() < ids.len() {
        tracing::warn!("Dependency cycle detected; ordering remaining operations by id");
        for id in ids {
            if !order.iter().any(|o| o == id) {
                order.push(id.to_string());
            }
        }
    }
    order
}

// ========== OPERATION LOG ==========

/// Load an operation log from a JSON file.
pub fn load_operation_log(path: &Path) -> Result<OperationLog> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Save an operation log to a JSON file.
pub fn save_operation_log(log: &OperationLog, path: &Path) -> Result<()> {
    write_atomic(path, serde_json::to_string_pretty(log)?.as_bytes())?;
    tracing::debug!("Operation log saved to {:?}", path);
    Ok(())
}

/// Undo a serialized operation log without any other state.
///
/// Walks the log in strict reverse order and undoes what it can: backup
/// copies are put back, appended blocks are removed by their markers and
/// symlinks are repointed. No phase, dependency or critical handling; every
/// failure is logged and the walk continues.
pub fn emergency_rollback(log_path: &Path) -> Result<RollbackReport> {
    let log = load_operation_log(log_path)?;
    tracing::warn!(
        "Emergency rollback of {} ({} operation(s))",
        log.hotfix,
        log.operations.len()
    );

    let mut report = RollbackReport::default();
    for op in log.operations.iter().rev() {
        if !op.applied {
            continue;
        }
        match emergency_undo(op) {
            Ok(StepResult::Done) => report.rolled_back.push(op.operation_id.clone()),
            Ok(StepResult::NothingToDo) => report.skipped.push(op.operation_id.clone()),
            Err(e) => {
                tracing::error!("Emergency undo of {} failed: {}", op.operation_id, e);
                report.failed.push(format!("{}: {}", op.operation_id, e));
            }
        }
    }
    Ok(report)
}

fn emergency_undo(op: &ForwardOperation) -> Result<StepResult> {
    let Some(target) = op.target.as_deref() else {
        return Ok(StepResult::NothingToDo);
    };

    match op.op_type {
        ForwardOpType::Append => {
            if !target.exists() {
                return Ok(StepResult::NothingToDo);
            }
            let content = fs::read_to_string(target)?;
            match markers::remove_block(&content, &op.operation_id) {
                Some(text) => {
                    write_after_removal(target, text, op.separator_added, op.target_existed)?;
                    Ok(StepResult::Done)
                }
                None => Ok(StepResult::NothingToDo),
            }
        }
        ForwardOpType::Copy | ForwardOpType::Symlink if op.previous_link.is_some() => {
            if let Some(link) = &op.previous_link {
                restore_symlink(target, link)?;
            }
            Ok(StepResult::Done)
        }
        ForwardOpType::Copy | ForwardOpType::Symlink => match &op.backup_path {
            Some(backup) => {
                if !backup.exists() {
                    return Err(crate::Error::BackupNotFound(backup.display().to_string()));
                }
                remove_any(target)?;
                copy_any(backup, target)?;
                Ok(StepResult::Done)
            }
            None if !op.target_existed => {
                remove_any(target)?;
                Ok(StepResult::Done)
            }
            None => Ok(StepResult::NothingToDo),
        },
        ForwardOpType::Execute | ForwardOpType::CaptureState => {
            tracing::warn!(
                "Skipping {} in emergency mode ({:?} is not undone)",
                op.operation_id,
                op.op_type
            );
            Ok(StepResult::NothingToDo)
        }
    }
}
