//! Update module registry and plugin discovery.

use crate::core::checksum::read_published_checksum;
use crate::models::module::ModuleResult;
use crate::services::process::{is_executable, run_command};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Entrypoint file a module directory must contain.
pub const ENTRYPOINT: &str = "update";

/// A per-service update module.
#[async_trait]
pub trait UpdateModule: Send + Sync {
    fn name(&self) -> &str;

    /// Published checksum of the module content, if any.
    fn checksum(&self) -> Option<String>;

    async fn main(&self, args: &[String]) -> Result<ModuleResult>;
}

/// Modules the orchestrator may dispatch to, by name.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn UpdateModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, replacing any previous one with the same name.
    pub fn register(&mut self, module: Arc<dyn UpdateModule>) {
        let name = module.name().to_string();
        if self.modules.insert(name.clone(), module).is_some() {
            tracing::warn!("Module {} registered twice; keeping the last one", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UpdateModule>> {
        self.modules.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Register every module found under `modules_dir`.
    ///
    /// Each subdirectory holding an executable `update` file becomes a
    /// [`CommandModule`]. Other entries are ignored.
    pub fn discover(modules_dir: &Path, timeout: Duration) -> Result<Self> {
        let mut registry = Self::new();
        if !modules_dir.is_dir() {
            tracing::warn!("Modules directory {:?} does not exist", modules_dir);
            return Ok(registry);
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(modules_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            if is_executable(&dir.join(ENTRYPOINT)) {
                registry.register(Arc::new(CommandModule::new(dir, timeout)));
            } else {
                tracing::debug!("Skipping {:?}: no executable {}", dir, ENTRYPOINT);
            }
        }

        tracing::info!("Discovered {} module(s) in {:?}", registry.len(), modules_dir);
        Ok(registry)
    }
}

/// A module implemented as an executable in its own directory.
#[derive(Debug, Clone)]
pub struct CommandModule {
    name: String,
    dir: PathBuf,
    timeout: Duration,
}

impl CommandModule {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { name, dir, timeout }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl UpdateModule for CommandModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> Option<String> {
        read_published_checksum(&self.dir)
            .map_err(|e| tracing::debug!("{}", e))
            .ok()
    }

    async fn main(&self, args: &[String]) -> Result<ModuleResult> {
        let output = run_command(self.dir.join(ENTRYPOINT), args, self.timeout).await?;
        for line in output.stderr.lines() {
            tracing::debug!("[{}] {}", self.name, line);
        }

        let reported = output
            .stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|l| serde_json::from_str::<ModuleResult>(l.trim()).ok());

        Ok(match reported {
            Some(result) => result,
            None if output.success() => ModuleResult::ok(false, output.stdout.trim()),
            None => ModuleResult::failed(if output.stderr.trim().is_empty() {
                format!("exit code {:?}", output.exit_code)
            } else {
                output.stderr.trim().to_string()
            }),
        })
    }
}
