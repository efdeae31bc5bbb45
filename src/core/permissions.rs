//! Ownership and mode snapshots for file trees.
//!
//! Restores are best-effort: a failed `chown` or `chmod` is logged and the
//! batch continues.

use crate::models::backup::FilePermissionInfo;
use crate::utils::users::NameCache;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use walkdir::WalkDir;

/// Mask covering permission, setuid, setgid and sticky bits.
const MODE_MASK: u32 = 0o7777;

/// Record owner, group and mode for every path, recursing into directories.
///
/// Missing paths are skipped with a warning.
pub fn capture(paths: &[impl AsRef<Path>]) -> Vec<FilePermissionInfo> {
    let names = NameCache::load();
    let mut entries = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if path.symlink_metadata().is_err() {
            tracing::warn!("Cannot capture permissions, path missing: {:?}", path);
            continue;
        }

        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
                match entry {
                    Ok(entry) if !entry.file_type().is_symlink() => {
                        if let Some(info) = capture_one(entry.path(), &names) {
                            entries.push(info);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Skipping unreadable entry under {:?}: {}", path, e),
                }
            }
        } else if let Some(info) = capture_one(path, &names) {
            entries.push(info);
        }
    }

    tracing::debug!("Captured permissions for {} entries", entries.len());
    entries
}

fn capture_one(path: &Path, names: &NameCache) -> Option<FilePermissionInfo> {
    match fs::metadata(path) {
        Ok(meta) => Some(FilePermissionInfo {
            path: path.to_path_buf(),
            mode: meta.mode() & MODE_MASK,
            uid: meta.uid(),
            gid: meta.gid(),
            owner: names.user(meta.uid()),
            group: names.group(meta.gid()),
        }),
        Err(e) => {
            tracing::warn!("Cannot stat {:?}: {}", path, e);
            None
        }
    }
}

/// Reapply recorded permissions. Returns how many entries were fully restored.
///
/// Ownership is applied before the mode, since `chown` may clear setuid bits.
pub fn restore(entries: &[FilePermissionInfo]) -> usize {
    let mut restored = 0;

    for info in entries {
        if !info.path.exists() {
            tracing::warn!("Skipping permissions for missing path: {:?}", info.path);
            continue;
        }

        let mut ok = true;
        if let Err(e) = chown_if_needed(info) {
            tracing::warn!(
                "chown {}:{} {:?} failed: {}",
                info.owner,
                info.group,
                info.path,
                e
            );
            ok = false;
        }
        if let Err(e) = fs::set_permissions(&info.path, fs::Permissions::from_mode(info.mode)) {
            tracing::warn!("chmod {:o} {:?} failed: {}", info.mode, info.path, e);
            ok = false;
        }

        if ok {
            restored += 1;
        }
    }

    tracing::debug!("Restored permissions for {}/{} entries", restored, entries.len());
    restored
}

fn chown_if_needed(info: &FilePermissionInfo) -> std::io::Result<()> {
    let meta = fs::metadata(&info.path)?;
    if meta.uid() == info.uid && meta.gid() == info.gid {
        return Ok(());
    }
    std::os::unix::fs::chown(&info.path, Some(info.uid), Some(info.gid))
}
