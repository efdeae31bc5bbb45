//! Sequential one-shot migrations.
//!
//! Migrations run in manifest order. A successful script flips `has_run` and
//! the manifest is saved right away; a failing one stays pending and is
//! retried on the next invocation.

use crate::models::migration::{Migration, MigrationManifest, MigrationReport, MigrationRun};
use crate::services::process::{is_executable, run_command};
use crate::utils::fs::write_atomic;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load a migration manifest from JSON.
pub fn load_manifest(path: &Path) -> Result<MigrationManifest> {
    if !path.exists() {
        return Err(crate::Error::ManifestNotFound(path.display().to_string()));
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| crate::Error::InvalidManifest(format!("{}: {}", path.display(), e)))
}

/// Save a migration manifest as JSON.
pub fn save_manifest(manifest: &MigrationManifest, path: &Path) -> Result<()> {
    write_atomic(path, serde_json::to_string_pretty(manifest)?.as_bytes())
}

pub struct MigrationManager {
    manifest_path: PathBuf,
    scripts_dir: PathBuf,
    timeout: Duration,
    manifest: MigrationManifest,
}

impl MigrationManager {
    /// Open the manifest at `manifest_path`; scripts are looked up in `scripts_dir`.
    pub fn open(
        manifest_path: impl Into<PathBuf>,
        scripts_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let manifest_path = manifest_path.into();
        let manifest = load_manifest(&manifest_path)?;
        Ok(Self {
            manifest_path,
            scripts_dir: scripts_dir.into(),
            timeout,
            manifest,
        })
    }

    pub fn manifest(&self) -> &MigrationManifest {
        &self.manifest
    }

    /// Migrations that have not run yet, in manifest order.
    pub fn pending(&self) -> Vec<&Migration> {
        self.manifest.migrations.iter().filter(|m| !m.has_run).collect()
    }

    pub fn script_path(&self, migration: &Migration) -> PathBuf {
        self.scripts_dir.join(self.manifest.script_for(migration))
    }

    /// Run every pending migration once.
    ///
    /// Failures are recorded and the run moves on to the next migration.
    /// Only an error persisting the manifest aborts the run.
    pub async fn run_all(&mut self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        for index in 0..self.manifest.migrations.len() {
            let migration = self.manifest.migrations[index].clone();
            if migration.has_run {
                tracing::debug!("Migration {:08} already ran", migration.id);
                report.already_run.push(migration.id);
                continue;
            }

            tracing::info!(
                "Running migration {:08} [{}]: {}",
                migration.id,
                migration.category(),
                migration.description
            );
            let run = self.execute(&migration).await;

            if run.success {
                self.manifest.migrations[index].has_run = true;
                save_manifest(&self.manifest, &self.manifest_path)?;
                tracing::info!("Migration {:08} completed", migration.id);
            } else {
                tracing::error!(
                    "Migration {:08} failed (exit {:?}): {}",
                    migration.id,
                    run.exit_code,
                    run.error.as_deref().unwrap_or_else(|| run.stderr.trim())
                );
            }
            report.runs.push(run);
        }

        Ok(report)
    }

    async fn execute(&self, migration: &Migration) -> MigrationRun {
        let mut run = MigrationRun {
            id: migration.id,
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        };

        let script = self.script_path(migration);
        if !is_executable(&script) {
            let err = crate::Error::MigrationFailed {
                id: migration.id,
                reason: format!("script {} is missing or not executable", script.display()),
            };
            run.error = Some(err.to_string());
            return run;
        }

        match run_command(&script, &[] as &[&str], self.timeout).await {
            Ok(output) => {
                for line in output.stdout.lines() {
                    tracing::info!("[{:08}] {}", migration.id, line);
                }
                for line in output.stderr.lines() {
                    tracing::warn!("[{:08}] {}", migration.id, line);
                }
                run.success = output.success();
                run.exit_code = output.exit_code;
                run.stdout = output.stdout;
                run.stderr = output.stderr;
            }
            Err(e) => run.error = Some(e.to_string()),
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let err = load_manifest(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, crate::Error::ManifestNotFound(_)));
    }

    #[test]
    fn test_invalid_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("migrations.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_manifest(&path), Err(crate::Error::InvalidManifest(_))));
    }

    #[tokio::test]
    async fn test_missing_script_stays_pending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("migrations.json");
        fs::write(
            &path,
            r#"{"migrations": [{"id": 10000001, "description": "enable unit", "has_run": false}]}"#,
        )
        .unwrap();

        let mut manager = MigrationManager::open(&path, dir.path(), Duration::from_secs(5)).unwrap();
        let report = manager.run_all().await.unwrap();
        assert_eq!(report.failed(), vec![10000001]);
        assert_eq!(manager.pending().len(), 1);
        assert!(!load_manifest(&path).unwrap().migrations[0].has_run);
    }
}
