//! Deterministic content checksums over directory trees.
//!
//! The digest covers every file's path relative to the root and its bytes,
//! visited in sorted order. Renaming a file changes the checksum; moving the
//! whole tree does not.

use crate::utils::hash::sha256_bytes;
use crate::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Name of the file a module publishes its checksum in.
pub const CHECKSUM_FILE: &str = "checksum";

/// Prefix accepted on manifest checksums.
const SHA256_PREFIX: &str = "sha256:";

/// Directory names never hashed.
const EXCLUDED_DIRS: &[&str] = &["__pycache__", "target", ".git"];

/// File extensions never hashed (bytecode and compiled artifacts).
const EXCLUDED_EXTENSIONS: &[&str] = &["pyc", "pyo", "o", "so"];

/// What to leave out of a tree checksum.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    pub file_names: Vec<String>,
    pub dir_names: Vec<String>,
    pub extensions: Vec<String>,
}

impl Exclusions {
    /// Hash everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Exclusions used for module source trees.
    pub fn module_defaults() -> Self {
        Self {
            file_names: vec![CHECKSUM_FILE.to_string()],
            dir_names: EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            extensions: EXCLUDED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            // The root itself is never excluded.
            return entry.depth() > 0 && self.dir_names.iter().any(|d| d == name.as_ref());
        }
        if self.file_names.iter().any(|f| f == name.as_ref()) {
            return true;
        }
        entry
            .path()
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                self.extensions.iter().any(|e| e == ext.as_ref())
            })
            .unwrap_or(false)
    }
}

/// Compute the checksum of a tree, skipping `exclusions`.
///
/// A single file is hashed as a one-entry tree named by its file name.
pub fn compute_tree_checksum(root: &Path, exclusions: &Exclusions) -> Result<String> {
    if !root.exists() {
        return Err(crate::Error::PathNotFound(root.display().to_string()));
    }

    let mut hasher = Sha256::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !exclusions.is_excluded(e));

    for entry in walker {
        let entry = entry.map_err(|e| crate::Error::other(format!("walk {:?}: {}", root, e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = if entry.depth() == 0 {
            entry.file_name().to_string_lossy().to_string()
        } else {
            entry
                .path()
                .strip_prefix(root)
                .map_err(|e| crate::Error::other(e.to_string()))?
                .to_string_lossy()
                .to_string()
        };

        hasher.update(relative.as_bytes());
        hasher.update(fs::read(entry.path())?);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Checksum of a module directory with the default exclusions.
pub fn compute_module_checksum(module_dir: &Path) -> Result<String> {
    compute_tree_checksum(module_dir, &Exclusions::module_defaults())
}

/// Compute and publish a module's checksum file. Returns the checksum.
pub fn write_checksum_file(module_dir: &Path) -> Result<String> {
    let checksum = compute_module_checksum(module_dir)?;
    fs::write(module_dir.join(CHECKSUM_FILE), format!("{}\n", checksum))?;
    tracing::info!("Published checksum for {:?}: {}", module_dir, checksum);
    Ok(checksum)
}

/// Read a module's published checksum.
pub fn read_published_checksum(module_dir: &Path) -> Result<String> {
    let path = module_dir.join(CHECKSUM_FILE);
    let content = fs::read_to_string(&path)
        .map_err(|e| crate::Error::ChecksumUnavailable(format!("{}: {}", path.display(), e)))?;
    let checksum = normalize_checksum(&content);
    if checksum.is_empty() {
        return Err(crate::Error::ChecksumUnavailable(format!(
            "{}: empty",
            path.display()
        )));
    }
    Ok(checksum)
}

/// Strip an optional `sha256:` prefix and whitespace, and lowercase.
pub fn normalize_checksum(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix(SHA256_PREFIX).unwrap_or(trimmed);
    stripped.trim().to_lowercase()
}

/// Compare a manifest-declared checksum against a published one.
pub fn checksums_match(expected: &str, published: &str) -> bool {
    let expected = normalize_checksum(expected);
    !expected.is_empty() && expected == normalize_checksum(published)
}

/// Result of a module self-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub published: String,
    pub computed: String,
}

impl VerifyReport {
    /// Whether the live tree still matches what was published.
    pub fn is_valid(&self) -> bool {
        self.published == self.computed
    }
}

/// Recompute a module's checksum and compare it to the published one.
pub fn verify_module(module_dir: &Path) -> Result<VerifyReport> {
    let published = read_published_checksum(module_dir)?;
    let computed = compute_module_checksum(module_dir)?;
    if published != computed {
        tracing::warn!(
            "Module {:?} drifted: published {}, computed {}",
            module_dir,
            published,
            computed
        );
    }
    Ok(VerifyReport { published, computed })
}

/// Short identifier derived from arbitrary content.
pub fn content_id(parts: &[&str]) -> String {
    let mut id = sha256_bytes(parts.join("\u{0}").as_bytes());
    id.truncate(16);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn module_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("update"), "#!/bin/sh\n").unwrap();
        fs::write(dir.path().join("lib/common.sh"), "x=1\n").unwrap();
        dir
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let dir = module_tree();
        let a = compute_module_checksum(dir.path()).unwrap();
        let b = compute_module_checksum(dir.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_checksum_ignores_excluded_entries() {
        let dir = module_tree();
        let before = compute_module_checksum(dir.path()).unwrap();

        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("__pycache__/x.cpython-311.pyc"), "bytecode").unwrap();
        fs::write(dir.path().join("lib/helper.pyc"), "bytecode").unwrap();
        fs::write(dir.path().join(CHECKSUM_FILE), "whatever").unwrap();

        assert_eq!(before, compute_module_checksum(dir.path()).unwrap());
    }

    #[test]
    fn test_rename_changes_checksum_but_move_does_not() {
        let dir = module_tree();
        let before = compute_module_checksum(dir.path()).unwrap();

        let moved = TempDir::new().unwrap();
        crate::utils::fs::copy_dir_all(dir.path(), &moved.path().join("elsewhere")).unwrap();
        assert_eq!(before, compute_module_checksum(&moved.path().join("elsewhere")).unwrap());

        fs::rename(dir.path().join("lib/common.sh"), dir.path().join("lib/shared.sh")).unwrap();
        assert_ne!(before, compute_module_checksum(dir.path()).unwrap());
    }

    #[test]
    fn test_published_checksum_roundtrip_and_drift() {
        let dir = module_tree();
        let published = write_checksum_file(dir.path()).unwrap();
        assert_eq!(read_published_checksum(dir.path()).unwrap(), published);
        assert!(verify_module(dir.path()).unwrap().is_valid());

        fs::write(dir.path().join("update"), "#!/bin/sh\nrm -rf /\n").unwrap();
        assert!(!verify_module(dir.path()).unwrap().is_valid());
    }

    #[test]
    fn test_missing_checksum_file_is_unavailable() {
        let dir = module_tree();
        assert!(matches!(
            read_published_checksum(dir.path()),
            Err(crate::Error::ChecksumUnavailable(_))
        ));
    }

    #[test]
    fn test_checksum_comparison() {
        assert!(checksums_match("sha256:ABCD", "abcd\n"));
        assert!(checksums_match("abcd", "abcd"));
        assert!(!checksums_match("sha256:AAAA", "bbbb"));
        assert!(!checksums_match("", ""));
    }
}
