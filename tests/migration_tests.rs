//! Integration tests for one-shot migrations.

use host_updater::core::migration::{load_manifest, MigrationManager};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn write_manifest(path: &Path, ids: &[u32]) {
    let migrations: Vec<_> = ids
        .iter()
        .map(|id| serde_json::json!({"id": id, "description": format!("migration {}", id), "has_run": false}))
        .collect();
    fs::write(
        path,
        serde_json::to_string_pretty(&serde_json::json!({ "migrations": migrations })).unwrap(),
    )
    .unwrap();
}

fn run_count(dir: &Path, name: &str) -> usize {
    fs::read_to_string(dir.join(name))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_completed_migration_never_reruns() {
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("migrations.json");
    write_manifest(&manifest, &[1]);
    let log = dir.path().join("ran.log");
    write_script(dir.path(), "00000001.sh", &format!("echo run >> {}", log.display()));

    for _ in 0..3 {
        let mut manager =
            MigrationManager::open(&manifest, dir.path(), Duration::from_secs(10)).unwrap();
        manager.run_all().await.unwrap();
    }

    assert_eq!(run_count(dir.path(), "ran.log"), 1);
    assert!(load_manifest(&manifest).unwrap().migrations[0].has_run);
}

#[tokio::test]
async fn test_failed_migration_retried_until_success() {
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("migrations.json");
    write_manifest(&manifest, &[20000001]);
    let marker = dir.path().join("marker");
    let log = dir.path().join("ran.log");
    write_script(
        dir.path(),
        "20000001.sh",
        &format!(
            "echo run >> {log}\nif [ -f {marker} ]; then exit 0; fi\ntouch {marker}\necho 'schema locked' >&2\nexit 1",
            log = log.display(),
            marker = marker.display()
        ),
    );

    // First run fails and stays pending.
    let mut manager = MigrationManager::open(&manifest, dir.path(), Duration::from_secs(10)).unwrap();
    let report = manager.run_all().await.unwrap();
    assert_eq!(report.failed(), vec![20000001]);
    assert_eq!(report.runs[0].exit_code, Some(1));
    assert!(report.runs[0].stderr.contains("schema locked"));
    assert!(!load_manifest(&manifest).unwrap().migrations[0].has_run);

    // Second run succeeds.
    let mut manager = MigrationManager::open(&manifest, dir.path(), Duration::from_secs(10)).unwrap();
    let report = manager.run_all().await.unwrap();
    assert_eq!(report.succeeded(), vec![20000001]);
    assert!(load_manifest(&manifest).unwrap().migrations[0].has_run);

    // Third run does nothing.
    let mut manager = MigrationManager::open(&manifest, dir.path(), Duration::from_secs(10)).unwrap();
    let report = manager.run_all().await.unwrap();
    assert!(report.runs.is_empty());
    assert_eq!(report.already_run, vec![20000001]);
    assert_eq!(run_count(dir.path(), "ran.log"), 2);
}

#[tokio::test]
async fn test_failure_does_not_block_later_migrations() {
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("migrations.json");
    write_manifest(&manifest, &[1, 2, 3]);
    write_script(dir.path(), "00000001.sh", "exit 0");
    write_script(dir.path(), "00000002.sh", "exit 7");
    write_script(dir.path(), "00000003.sh", "echo done");

    let mut manager = MigrationManager::open(&manifest, dir.path(), Duration::from_secs(10)).unwrap();
    let report = manager.run_all().await.unwrap();

    assert_eq!(report.succeeded(), vec![1, 3]);
    assert_eq!(report.failed(), vec![2]);
    assert_eq!(report.runs[2].stdout.trim(), "done");

    let saved = load_manifest(&manifest).unwrap();
    let flags: Vec<_> = saved.migrations.iter().map(|m| m.has_run).collect();
    assert_eq!(flags, vec![true, false, true]);
    assert_eq!(manager.pending().len(), 1);
}

#[tokio::test]
async fn test_manifest_order_is_kept() {
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("migrations.json");
    write_manifest(&manifest, &[3, 1]);
    let log = dir.path().join("order.log");
    write_script(dir.path(), "00000003.sh", &format!("echo 3 >> {}", log.display()));
    write_script(dir.path(), "00000001.sh", &format!("echo 1 >> {}", log.display()));

    let mut manager = MigrationManager::open(&manifest, dir.path(), Duration::from_secs(10)).unwrap();
    manager.run_all().await.unwrap();

    assert_eq!(fs::read_to_string(&log).unwrap(), "3\n1\n");
}

#[tokio::test]
async fn test_timeout_leaves_migration_pending() {
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("migrations.json");
    write_manifest(&manifest, &[5]);
    write_script(dir.path(), "00000005.sh", "sleep 5");

    let mut manager =
        MigrationManager::open(&manifest, dir.path(), Duration::from_millis(200)).unwrap();
    let report = manager.run_all().await.unwrap();

    assert_eq!(report.failed(), vec![5]);
    assert!(report.runs[0].error.as_deref().unwrap().contains("timed out"));
    assert!(!load_manifest(&manifest).unwrap().migrations[0].has_run);
}
