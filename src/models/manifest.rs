//! Orchestrator manifest data model.

use serde::{Deserialize, Serialize};

/// Manifest file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Name of the entry whose children get executed.
    pub entrypoint: String,
    pub updates: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.updates.iter().find(|e| e.name == name)
    }
}

/// A single update entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    /// Registered module this entry dispatches to.
    pub module: String,
    /// Expected published checksum, optionally `sha256:`-prefixed.
    pub checksum: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
}
