//! Typed snapshot store data model.

use super::backup::DatabaseSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Kind of resource a typed backup or snapshot protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    File,
    Service,
    Database,
    System,
}

/// A single typed backup. Many may coexist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub backup_id: String,
    pub timestamp: String,
    pub backup_type: BackupType,
    pub description: String,
    /// What was backed up (file path, comma-joined service names, database).
    pub source_path: String,
    /// Where the backup content lives.
    pub backup_path: PathBuf,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub checksum: String,
}

/// A point-in-time capture, restorable on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub snapshot_id: String,
    pub timestamp: String,
    pub description: String,
    pub snapshot_type: BackupType,
    pub data_path: PathBuf,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub checksum: String,
}

/// What a snapshot should capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SnapshotTarget {
    Files { paths: Vec<PathBuf> },
    Services { names: Vec<String> },
    Database { spec: DatabaseSpec },
    System { paths: Vec<PathBuf>, services: Vec<String> },
}

impl SnapshotTarget {
    pub fn snapshot_type(&self) -> BackupType {
        match self {
            SnapshotTarget::Files { .. } => BackupType::File,
            SnapshotTarget::Services { .. } => BackupType::Service,
            SnapshotTarget::Database { .. } => BackupType::Database,
            SnapshotTarget::System { .. } => BackupType::System,
        }
    }
}

/// Backup index file content.
pub type BackupIndex = BTreeMap<String, BackupInfo>;

/// Snapshot index file content.
pub type SnapshotIndex = BTreeMap<String, StateSnapshot>;
