//! Hotfix executor.
//!
//! Applies the forward operations of a hotfix plan:
//! - copy: Put `source` over `target`
//! - append: Add a marker-delimited block to `target`
//! - symlink: Point `target` at `source`
//! - execute: Run a command
//! - capture_state: Snapshot `target` for later restore
//!
//! Every operation is recorded in the operation log before the host is
//! touched, so an interrupted run can still be undone with
//! [`emergency_rollback`](crate::core::rollback::emergency_rollback).

use crate::core::markers;
use crate::core::rollback::{
    build_rollback_plan, dependency_order, save_operation_log, RollbackManager, RollbackReport,
};
use crate::models::rollback::{ForwardOpType, ForwardOperation, HotfixPlan, OperationLog};
use crate::models::snapshot::SnapshotTarget;
use crate::services::process::run_checked;
use crate::utils::fs::{copy_any, remove_any};
use crate::Result;
use chrono::Utc;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Result of applying a hotfix.
#[derive(Debug, Clone)]
pub struct HotfixResult {
    /// Operations applied, in application order.
    pub log: OperationLog,
    /// Where the log was saved.
    pub log_path: PathBuf,
    pub success: bool,
    /// Non-critical operations that failed, as `id: error`.
    pub failed_operations: Vec<String>,
    /// The critical operation that stopped the hotfix.
    pub failed_operation: Option<String>,
    pub error: Option<String>,
    /// Present when a failure triggered an automatic rollback.
    pub rollback: Option<RollbackReport>,
}

/// Load a hotfix plan from a JSON file.
pub fn load_hotfix_plan(path: &Path) -> Result<HotfixPlan> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Applies hotfix plans and records what it did.
pub struct HotfixExecutor<'a> {
    manager: &'a RollbackManager,
    log_dir: PathBuf,
    log_path: Option<PathBuf>,
}

impl<'a> HotfixExecutor<'a> {
    pub fn new(manager: &'a RollbackManager) -> Self {
        Self {
            log_dir: manager.root().join("logs"),
            log_path: None,
            manager,
        }
    }

    /// Write the operation log to `path` instead of a generated file under
    /// the rollback root.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Validate a plan without touching the host.
    pub fn validate(&self, plan: &HotfixPlan) -> Result<()> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        // Ids end up inside marker lines and file names.
        let id_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@-]*$")
            .map_err(|e| crate::Error::other(e.to_string()))?;

        if plan.name.trim().is_empty() {
            errors.push("hotfix has no name".to_string());
        } else if !id_pattern.is_match(&plan.name) {
            errors.push(format!("invalid hotfix name: {:?}", plan.name));
        }

        for op in &plan.operations {
            if !seen.insert(op.operation_id.as_str()) {
                errors.push(format!("duplicate operation id: {}", op.operation_id));
            }
            if !id_pattern.is_match(&op.operation_id) {
                errors.push(format!("invalid operation id: {:?}", op.operation_id));
            }
            let missing = match op.op_type {
                ForwardOpType::Copy | ForwardOpType::Symlink => {
                    if op.source.is_none() {
                        Some("source")
                    } else if op.target.is_none() {
                        Some("target")
                    } else {
                        None
                    }
                }
                ForwardOpType::Append => {
                    if op.content.is_none() {
                        Some("content")
                    } else if op.target.is_none() {
                        Some("target")
                    } else {
                        None
                    }
                }
                ForwardOpType::Execute => match &op.command {
                    Some(cmd) if !cmd.is_empty() => None,
                    _ => Some("command"),
                },
                ForwardOpType::CaptureState => op.target.is_none().then_some("target"),
            };
            if let Some(field) = missing {
                errors.push(format!("{} is missing '{}'", op.operation_id, field));
            }
            if op.op_type == ForwardOpType::Copy {
                if let Some(source) = &op.source {
                    if !source.exists() {
                        errors.push(format!("{}: source not found: {}", op.operation_id, source.display()));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            for error in &errors {
                tracing::error!("Hotfix {}: {}", plan.name, error);
            }
            Err(crate::Error::ValidationFailed(errors.join("; ")))
        }
    }

    /// Operations in application order: by phase, dependencies first.
    pub fn ordered(plan: &HotfixPlan) -> Vec<ForwardOperation> {
        let mut phases: BTreeMap<i32, Vec<&ForwardOperation>> = BTreeMap::new();
        for op in &plan.operations {
            phases.entry(op.phase).or_default().push(op);
        }

        let mut ordered = Vec::with_capacity(plan.operations.len());
        for ops in phases.values() {
            let nodes: Vec<(String, Vec<String>)> = ops
                .iter()
                .map(|o| (o.operation_id.clone(), o.dependencies.clone()))
                .collect();
            for id in dependency_order(&nodes, true) {
                if let Some(op) = ops.iter().find(|o| o.operation_id == id) {
                    ordered.push((*op).clone());
                }
            }
        }
        ordered
    }

    /// Apply a hotfix plan.
    ///
    /// Pre-checks must pass before anything is applied. A failing critical
    /// operation, or failing post-checks, stop the hotfix and roll back what
    /// was applied when `rollback_on_failure` is set. Non-critical failures
    /// are collected in [`HotfixResult::failed_operations`] and skipped.
    pub async fn apply(&self, plan: &HotfixPlan) -> Result<HotfixResult> {
        self.validate(plan)?;
        self.run_checks("pre-check", &plan.pre_checks).await?;

        let session_id = Uuid::new_v4().to_string();
        let log_path = match &self.log_path {
            Some(path) => path.clone(),
            None => self.log_dir.join(format!("{}-{}.json", plan.name, session_id)),
        };
        let mut log = OperationLog {
            version: "1.0".to_string(),
            session_id,
            hotfix: plan.name.clone(),
            started_at: Utc::now().to_rfc3339(),
            operations: Vec::new(),
        };

        tracing::info!(
            "Applying hotfix {} ({} operation(s))",
            plan.name,
            plan.operations.len()
        );

        let mut failure: Option<(Option<String>, String)> = None;
        let mut failed_operations = Vec::new();
        for mut op in Self::ordered(plan) {
            tracing::info!("Apply [{}]: {:?}", op.operation_id, op.op_type);
            match self.apply_operation(&mut op, &mut log, &log_path).await {
                Ok(()) => {}
                Err(e) if op.critical => {
                    tracing::error!("Critical operation {} failed: {}", op.operation_id, e);
                    failure = Some((Some(op.operation_id.clone()), e.to_string()));
                    break;
                }
                Err(e) => {
                    tracing::warn!("Operation {} failed, continuing: {}", op.operation_id, e);
                    failed_operations.push(format!("{}: {}", op.operation_id, e));
                }
            }
        }

        if failure.is_none() {
            if let Err(e) = self.run_checks("post-check", &plan.post_checks).await {
                failure = Some((None, e.to_string()));
            }
        }

        let mut result = HotfixResult {
            log,
            log_path,
            success: failure.is_none(),
            failed_operations,
            failed_operation: None,
            error: None,
            rollback: None,
        };

        if let Some((failed_operation, error)) = failure {
            result.failed_operation = failed_operation;
            result.error = Some(error);
            if plan.rollback_on_failure {
                tracing::warn!("Rolling back hotfix {}", plan.name);
                let rollback_plan = build_rollback_plan(&result.log.operations);
                result.rollback = Some(self.manager.execute_rollback_plan(&rollback_plan).await);
            }
        } else if result.failed_operations.is_empty() {
            tracing::info!("Hotfix {} applied", plan.name);
        } else {
            tracing::warn!(
                "Hotfix {} applied with {} failed operation(s)",
                plan.name,
                result.failed_operations.len()
            );
        }

        Ok(result)
    }

    async fn run_checks(&self, label: &str, checks: &[Vec<String>]) -> Result<()> {
        for check in checks {
            let Some((program, args)) = check.split_first() else {
                continue;
            };
            run_checked(program, args, self.manager.script_timeout())
                .await
                .map_err(|e| crate::Error::ValidationFailed(format!("{} failed: {}", label, e)))?;
        }
        Ok(())
    }

    /// Back up, log, then mutate.
    async fn apply_operation(
        &self,
        op: &mut ForwardOperation,
        log: &mut OperationLog,
        log_path: &Path,
    ) -> Result<()> {
        let target = op.target.clone();

        if let Some(target) = &target {
            op.target_existed = target.symlink_metadata().is_ok();
            if matches!(op.op_type, ForwardOpType::Copy | ForwardOpType::Symlink | ForwardOpType::Append) {
                if let Ok(link) = fs::read_link(target) {
                    op.previous_link = Some(link);
                } else if op.target_existed {
                    let info = self
                        .manager
                        .backup_file(target, &format!("{} {}", log.hotfix, op.operation_id))
                        .await?;
                    op.backup_id = Some(info.backup_id);
                    op.backup_path = Some(info.backup_path);
                }
            }
        }

        if op.op_type == ForwardOpType::Append {
            if let Some(target) = &target {
                let existing = fs::read_to_string(target).unwrap_or_default();
                if markers::contains_block(&existing, &op.operation_id) {
                    tracing::info!("{} already applied to {:?}", op.operation_id, target);
                    return Ok(());
                }
                let content = op.content.clone().unwrap_or_default();
                let (_, hash) = markers::append_block(&existing, &op.operation_id, &content);
                op.appended_hash = Some(hash);
                op.separator_added = markers::needs_separator(&existing);
            }
        }

        // Recorded before mutation so an interruption leaves an undoable log.
        op.applied = true;
        log.operations.push(op.clone());
        save_operation_log(log, log_path)?;

        let result = self.mutate(op).await;
        if let Some(snapshot_id) = result.as_ref().ok().and_then(|id| id.clone()) {
            if let Some(last) = log.operations.last_mut() {
                last.snapshot_id = Some(snapshot_id);
            }
            save_operation_log(log, log_path)?;
        }
        result.map(|_| ())
    }

    /// Perform the operation. Returns a snapshot id for capture_state.
    async fn mutate(&self, op: &ForwardOperation) -> Result<Option<String>> {
        let target = op.target.as_deref();
        match op.op_type {
            ForwardOpType::Copy => {
                let (source, target) = (required(op.source.as_deref(), op, "source")?, required(target, op, "target")?);
                remove_any(target)?;
                copy_any(source, target)?;
                Ok(None)
            }
            ForwardOpType::Symlink => {
                let (source, target) = (required(op.source.as_deref(), op, "source")?, required(target, op, "target")?);
                remove_any(target)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                std::os::unix::fs::symlink(source, target)?;
                Ok(None)
            }
            ForwardOpType::Append => {
                let target = required(target, op, "target")?;
                let existing = fs::read_to_string(target).unwrap_or_default();
                let content = op.content.as_deref().unwrap_or_default();
                let (updated, _) = markers::append_block(&existing, &op.operation_id, content);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(target, updated)?;
                Ok(None)
            }
            ForwardOpType::Execute => {
                let command = op.command.as_deref().unwrap_or_default();
                let Some((program, args)) = command.split_first() else {
                    return Err(crate::Error::ValidationFailed(format!(
                        "{} has an empty command",
                        op.operation_id
                    )));
                };
                let output = run_checked(program, args, self.manager.script_timeout()).await?;
                if !output.stdout.trim().is_empty() {
                    tracing::info!("[{}] {}", op.operation_id, output.stdout.trim());
                }
                Ok(None)
            }
            ForwardOpType::CaptureState => {
                let target = required(target, op, "target")?;
                let snapshot = self
                    .manager
                    .create_snapshot(
                        &format!("capture for {}", op.operation_id),
                        &SnapshotTarget::Files {
                            paths: vec![target.to_path_buf()],
                        },
                    )
                    .await?;
                Ok(Some(snapshot.snapshot_id))
            }
        }
    }
}

fn required<'p>(path: Option<&'p Path>, op: &ForwardOperation, field: &str) -> Result<&'p Path> {
    path.ok_or_else(|| {
        crate::Error::ValidationFailed(format!("{} is missing '{}'", op.operation_id, field))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: &str, phase: i32, deps: &[&str]) -> ForwardOperation {
        let mut op = ForwardOperation::new(id, ForwardOpType::Execute, phase);
        op.command = Some(vec!["true".to_string()]);
        op.dependencies = deps.iter().map(|d| d.to_string()).collect();
        op
    }

    #[test]
    fn test_ordered_by_phase_then_dependencies() {
        let plan = HotfixPlan {
            name: "fix".to_string(),
            operations: vec![
                op("restart", 2, &[]),
                op("b-write", 1, &["a-write"]),
                op("a-write", 1, &[]),
                op("0-config", 1, &["b-write"]),
            ],
            ..HotfixPlan::default()
        };
        let ids: Vec<_> = HotfixExecutor::ordered(&plan)
            .into_iter()
            .map(|o| o.operation_id)
            .collect();
        assert_eq!(ids, vec!["a-write", "b-write", "0-config", "restart"]);
    }
}
