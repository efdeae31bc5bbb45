//! File system utilities.

use crate::Result;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Path of `original` mirrored under `root`, with the leading `/` stripped.
///
/// `/etc/nginx/nginx.conf` under `/backup/files` becomes
/// `/backup/files/etc/nginx/nginx.conf`.
pub fn mirrored_path(root: &Path, original: &Path) -> PathBuf {
    let relative: PathBuf = original
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    root.join(relative)
}

/// Copy a file, keeping its permission bits and modification time.
pub fn copy_file_preserving(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;

    // mtime is cosmetic; read-only copies cannot be reopened for writing.
    let modified = fs::metadata(from)?.modified();
    if let (Ok(modified), Ok(file)) = (modified, fs::File::options().write(true).open(to)) {
        let _ = file.set_modified(modified);
    }
    Ok(())
}

/// Recursively copy a directory tree, preserving file metadata.
///
/// Symlinks are recreated as symlinks rather than followed.
pub fn copy_dir_all(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;

    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| crate::Error::other(format!("walk {:?}: {}", from, e)))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| crate::Error::other(e.to_string()))?;
        let dest = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
            fs::set_permissions(&dest, entry.metadata().map_err(walk_err)?.permissions())?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if dest.symlink_metadata().is_ok() {
                fs::remove_file(&dest)?;
            }
            std::os::unix::fs::symlink(link, &dest)?;
        } else {
            copy_file_preserving(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Copy a file or directory to `to`.
pub fn copy_any(from: &Path, to: &Path) -> Result<()> {
    if from.is_dir() {
        copy_dir_all(from, to)
    } else {
        copy_file_preserving(from, to)
    }
}

/// Remove a file, symlink or directory tree. Missing paths are fine.
pub fn remove_any(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Write `content` to `path` through a temporary sibling and a rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn walk_err(e: walkdir::Error) -> crate::Error {
    crate::Error::other(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_mirrored_path() {
        let root = Path::new("/backup/files");
        assert_eq!(
            mirrored_path(root, Path::new("/etc/nginx/nginx.conf")),
            PathBuf::from("/backup/files/etc/nginx/nginx.conf")
        );
        assert_eq!(
            mirrored_path(root, Path::new("relative/x")),
            PathBuf::from("/backup/files/relative/x")
        );
    }

    #[test]
    fn test_copy_dir_all_preserves_mode() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/run.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(src.join("nested/run.sh"), fs::Permissions::from_mode(0o750)).unwrap();
        std::os::unix::fs::symlink("nested/run.sh", src.join("link")).unwrap();

        let dst = temp_dir.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();

        let mode = fs::metadata(dst.join("nested/run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
        assert_eq!(fs::read_link(dst.join("link")).unwrap(), PathBuf::from("nested/run.sh"));
    }

    #[test]
    fn test_remove_any_missing_is_ok() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert!(remove_any(&temp_dir.path().join("missing")).is_ok());
    }
}
