//! Scoped filesystem operations.
//!
//! These are plain synchronous `std::fs` calls. The rest of the system
//! already treats every file-manager failure as fatal to the current
//! Watcher call, so there's no error-recovery value in making these
//! async; callers on a tokio runtime that touch many files at once
//! (`reset_current_directory`) wrap the call in
//! `tokio::task::spawn_blocking` themselves.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::FileManagerError;

/// Removes every entry in `root` recursively. Used only at startup, before
/// the repository clone — nothing else may hold open files below `root`
/// while this runs.
pub fn reset_current_directory(root: &Path) -> Result<(), FileManagerError> {
    let entries = fs::read_dir(root).map_err(|source| FileManagerError::Reset { source })?;
    for entry in entries {
        let entry = entry.map_err(|source| FileManagerError::Reset { source })?;
        fs::remove_dir_all(entry.path()).or_else(|_| fs::remove_file(entry.path())).map_err(
            |source| FileManagerError::Reset { source },
        )?;
    }
    Ok(())
}

/// Creates all missing parent directories (mode 0755 on unix) then writes
/// `bytes` to `path` (mode 0644 on unix). Overwrite is expected.
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<(), FileManagerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| FileManagerError::CreateParent { path: parent.to_path_buf(), source })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = fs::metadata(parent) {
                let mut perms = metadata.permissions();
                perms.set_mode(0o755);
                let _ = fs::set_permissions(parent, perms);
            }
        }
    }

    fs::write(path, bytes).map_err(|source| FileManagerError::Write { path: path.to_path_buf(), source })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o644);
            let _ = fs::set_permissions(path, perms);
        }
    }

    Ok(())
}

/// Removes `path`, then walks upward removing each now-empty parent
/// directory, stopping at the first non-empty directory or `stop_at`.
pub fn delete_file(path: &Path, stop_at: &Path) -> Result<(), FileManagerError> {
    fs::remove_file(path).map_err(|source| FileManagerError::Delete { path: path.to_path_buf(), source })?;
    remove_empty_ancestors(path, stop_at);
    Ok(())
}

fn remove_empty_ancestors(path: &Path, stop_at: &Path) {
    let mut current: PathBuf = path.to_path_buf();
    loop {
        let Some(parent) = current.parent() else { return };
        if parent == stop_at || parent.as_os_str().is_empty() {
            return;
        }
        if fs::remove_dir(parent).is_err() {
            return;
        }
        current = parent.to_path_buf();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_file_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prod/configmaps/app-cfg.yaml");
        write_file(&path, b"data: 1\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "data: 1\n");
    }

    #[test]
    fn write_file_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b.yaml");
        write_file(&path, b"one").unwrap();
        write_file(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn delete_file_prunes_empty_parents_up_to_root() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prod/configmaps/app-cfg.yaml");
        write_file(&path, b"x").unwrap();

        delete_file(&path, dir.path()).unwrap();

        assert!(!path.exists());
        assert!(!dir.path().join("prod/configmaps").exists());
        assert!(!dir.path().join("prod").exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn delete_file_stops_at_non_empty_sibling() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("prod/configmaps/app-cfg.yaml");
        let b = dir.path().join("prod/configmaps/other.yaml");
        write_file(&a, b"x").unwrap();
        write_file(&b, b"y").unwrap();

        delete_file(&a, dir.path()).unwrap();

        assert!(dir.path().join("prod/configmaps").exists());
        assert!(b.exists());
    }

    #[test]
    fn delete_missing_file_reports_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        let err = delete_file(&path, dir.path()).unwrap_err();
        assert!(err.is_not_found());
    }
}
