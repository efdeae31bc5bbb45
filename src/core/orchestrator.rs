//! Manifest-driven, checksum-gated dispatch of update modules.

use crate::core::checksum::{checksums_match, normalize_checksum};
use crate::core::registry::{ModuleRegistry, UpdateModule};
use crate::models::config::Config;
use crate::models::manifest::{Manifest, ManifestEntry};
use crate::models::module::ModuleResult;
use crate::Result;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Results keyed by module; `None` when the module errored or panicked.
pub type RunResults = BTreeMap<String, Option<ModuleResult>>;

/// Load a manifest from a JSON file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    if !path.exists() {
        return Err(crate::Error::ManifestNotFound(path.display().to_string()));
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| crate::Error::InvalidManifest(format!("{}: {}", path.display(), e)))
}

/// A unit of work that passed the gate.
struct Unit {
    module: Arc<dyn UpdateModule>,
    args: Vec<String>,
}

pub struct Orchestrator {
    registry: ModuleRegistry,
    max_workers: usize,
}

impl Orchestrator {
    pub fn new(registry: ModuleRegistry, config: &Config) -> Self {
        Self {
            registry,
            max_workers: config.max_workers.max(1),
        }
    }

    pub async fn run_manifest(&self, path: &Path) -> Result<RunResults> {
        let manifest = load_manifest(path)?;
        self.run(&manifest).await
    }

    /// Gate and dispatch the entrypoint's children, then wait for all of them.
    pub async fn run(&self, manifest: &Manifest) -> Result<RunResults> {
        let entrypoint = manifest.entry(&manifest.entrypoint).ok_or_else(|| {
            crate::Error::InvalidManifest(format!(
                "entrypoint {:?} is not listed in updates",
                manifest.entrypoint
            ))
        })?;

        let units: Vec<Unit> = entrypoint
            .children
            .iter()
            .filter_map(|child| self.admit(manifest, child))
            .collect();

        tracing::info!(
            "Dispatching {} of {} module(s) with {} worker(s)",
            units.len(),
            entrypoint.children.len(),
            self.max_workers
        );

        let results: RunResults = stream::iter(units)
            .map(|unit| async move {
                let name = unit.module.name().to_string();
                let module = Arc::clone(&unit.module);
                let handle = tokio::spawn(async move { module.main(&unit.args).await });
                let result = match handle.await {
                    Ok(Ok(result)) => {
                        if result.success {
                            tracing::info!("Module {} finished (updated: {})", name, result.updated);
                        } else {
                            tracing::error!(
                                "Module {} reported failure: {}",
                                name,
                                result.error.as_deref().unwrap_or("unknown error")
                            );
                        }
                        Some(result)
                    }
                    Ok(Err(e)) => {
                        tracing::error!("Module {} failed: {}", name, e);
                        None
                    }
                    Err(e) => {
                        tracing::error!("Module {} crashed: {}", name, e);
                        None
                    }
                };
                (name, result)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        Ok(results)
    }

    /// Resolve a child and apply the checksum gate.
    fn admit(&self, manifest: &Manifest, child: &str) -> Option<Unit> {
        let Some(entry) = manifest.entry(child) else {
            tracing::error!("Child {} is not listed in the manifest", child);
            return None;
        };
        let Some(module) = self.registry.get(&entry.module) else {
            tracing::error!(
                "Skipping {}: {}",
                entry.name,
                crate::Error::ModuleNotFound(entry.module.clone())
            );
            return None;
        };
        if !gate(entry, module.as_ref()) {
            return None;
        }
        Some(Unit {
            module,
            args: entry.args.clone(),
        })
    }
}

/// Whether a module's published checksum matches the manifest.
fn gate(entry: &ManifestEntry, module: &dyn UpdateModule) -> bool {
    match module.checksum() {
        Some(published) if checksums_match(&entry.checksum, &published) => true,
        Some(published) => {
            let err = crate::Error::ChecksumMismatch {
                module: entry.module.clone(),
                expected: normalize_checksum(&entry.checksum),
                actual: normalize_checksum(&published),
            };
            tracing::error!("Skipping {}: {}", entry.name, err);
            false
        }
        None => {
            tracing::error!(
                "Skipping {}: {}",
                entry.name,
                crate::Error::ChecksumUnavailable(entry.module.clone())
            );
            false
        }
    }
}
