//! Forward operation and rollback plan data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Kind of forward operation performed by a hotfix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardOpType {
    /// Copy `source` over `target`.
    Copy,
    /// Append `content` to `target` between markers.
    Append,
    /// Point the symlink `target` at `source`.
    Symlink,
    /// Run `command`.
    Execute,
    /// Capture a state snapshot of `target`.
    CaptureState,
}

/// A step of a hotfix, and after application, a record of what was done.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardOperation {
    pub operation_id: String,
    pub op_type: ForwardOpType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
    /// Text to append (append only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Command line to run (execute only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Script undoing an execute operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_script: Option<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub phase: i32,
    #[serde(default)]
    pub critical: bool,

    // Filled in while applying.
    /// Typed backup taken of `target` before mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    /// Copy of the backup content, usable without the snapshot index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// Symlink destination before the operation, if `target` was a symlink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_link: Option<PathBuf>,
    /// Whether `target` existed before the operation.
    #[serde(default)]
    pub target_existed: bool,
    /// Snapshot captured by a capture_state operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// SHA-256 of the appended block, markers included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appended_hash: Option<String>,
    /// Whether the append inserted a newline before its block.
    #[serde(default)]
    pub separator_added: bool,
    #[serde(default)]
    pub applied: bool,
}

impl ForwardOperation {
    pub fn new(operation_id: impl Into<String>, op_type: ForwardOpType, phase: i32) -> Self {
        Self {
            operation_id: operation_id.into(),
            op_type,
            source: None,
            target: None,
            content: None,
            command: None,
            rollback_script: None,
            dependencies: Vec::new(),
            phase,
            critical: false,
            backup_id: None,
            backup_path: None,
            previous_link: None,
            target_existed: false,
            snapshot_id: None,
            appended_hash: None,
            separator_added: false,
            applied: false,
        }
    }
}

/// Kind of undo step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackType {
    /// Put backed-up content back (or remove what did not exist before).
    RestoreBackup,
    /// Run the operation's rollback script.
    ExecuteScript,
    /// Restore a state snapshot.
    RestoreState,
    /// Remove a marker-delimited appended block.
    RemoveAppend,
}

/// One undo step, derived 1:1 from an applied forward operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOperation {
    pub operation_id: String,
    pub rollback_type: RollbackType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_script: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_snapshot_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub phase: i32,
    pub critical: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Rollback steps grouped by phase. Executed from the highest phase down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub phases: BTreeMap<i32, Vec<RollbackOperation>>,
}

impl RollbackPlan {
    pub fn len(&self) -> usize {
        self.phases.values().map(|ops| ops.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hotfix plan file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotfixPlan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Commands that must all succeed before anything is applied.
    #[serde(default)]
    pub pre_checks: Vec<Vec<String>>,
    /// Commands that must all succeed after everything is applied.
    #[serde(default)]
    pub post_checks: Vec<Vec<String>>,
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
    pub operations: Vec<ForwardOperation>,
}

fn default_true() -> bool {
    true
}

/// Persisted log of applied forward operations, in application order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationLog {
    pub version: String,
    pub session_id: String,
    pub hotfix: String,
    pub started_at: String,
    pub operations: Vec<ForwardOperation>,
}
