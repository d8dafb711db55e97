//! Remote mirroring of the archive root.
//!
//! The archive root's directory skeleton is recreated at the [`RemoteStore`], every file is
//! uploaded into the folder matching its local relative directory, and the archive root is
//! deleted only after all of that succeeded. Any failure leaves the whole archive root in
//! place, so the next run uploads the same artifacts again from scratch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{error, info};
use walkdir::WalkDir;

use crate::contract::RemoteStore;
use crate::error::{BackupError, Result};

/// Everything below an archive root that has to be mirrored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePaths {
    /// Relative, `/`-separated directories that contain at least one file.
    pub dir_paths: BTreeSet<String>,
    /// Absolute paths of every file.
    pub file_paths: BTreeSet<PathBuf>,
}

/// Counts of what a successful mirror sent to the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub dirs: usize,
    pub files: usize,
}

/// Walks `archive_root`, collecting file paths and the relative directories holding them.
///
/// A missing archive root yields empty sets.
pub fn collect_archive_paths(archive_root: &Path) -> Result<ArchivePaths> {
    let mut paths = ArchivePaths::default();
    if !archive_root.exists() {
        return Ok(paths);
    }

    for entry in WalkDir::new(archive_root).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_path = entry.into_path();
        let relative_dir = relative_dir(archive_root, &file_path)?;
        if !relative_dir.is_empty() {
            paths.dir_paths.insert(relative_dir);
        }
        paths.file_paths.insert(file_path);
    }
    Ok(paths)
}

/// Whether `archive_root` holds any file waiting to be mirrored.
pub fn has_pending_archives(archive_root: &Path) -> Result<bool> {
    if !archive_root.exists() {
        return Ok(false);
    }
    for entry in WalkDir::new(archive_root).min_depth(1) {
        if entry?.file_type().is_file() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Relative directory of `file` below `root`, `/`-separated; empty for files directly in `root`.
pub fn relative_dir(root: &Path, file: &Path) -> Result<String> {
    let parent = file.parent().unwrap_or(root);
    let relative = parent
        .strip_prefix(root)
        .map_err(|_| BackupError::InvalidPath {
            path: file.to_path_buf(),
            reason: "file is outside the archive root",
        })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Mirrors `archive_root` into `remote_root` and clears it once every call succeeded.
pub async fn mirror_archives<R>(
    store: &R,
    remote_root: &str,
    archive_root: &Path,
) -> Result<MirrorSummary>
where
    R: RemoteStore + ?Sized,
{
    let paths = collect_archive_paths(archive_root)?;

    for dir_path in &paths.dir_paths {
        info!(remote_root, dir_path = %dir_path, "[MIRROR] Ensuring dir exists");
        store.ensure_dir(remote_root, dir_path).await.map_err(|e| {
            error!(remote_root, dir_path = %dir_path, error = %e, "[MIRROR][ERROR] Failed to ensure dir");
            e
        })?;
    }

    for file_path in &paths.file_paths {
        let relative_dir = relative_dir(archive_root, file_path)?;
        info!(
            remote_root,
            relative_dir = %relative_dir,
            file_path = %file_path.display(),
            "[MIRROR] Uploading file"
        );
        store
            .upload_file(remote_root, &relative_dir, file_path)
            .await
            .map_err(|e| {
                error!(file_path = %file_path.display(), error = %e, "[MIRROR][ERROR] Upload failed, keeping archive root");
                e
            })?;
    }

    clean_archive_root(archive_root)?;
    Ok(MirrorSummary {
        dirs: paths.dir_paths.len(),
        files: paths.file_paths.len(),
    })
}

/// Deletes the archive root. The clone root is never touched here.
pub fn clean_archive_root(archive_root: &Path) -> Result<()> {
    info!(archive_root = %archive_root.display(), "[MIRROR] Cleaning archive path");
    if archive_root.is_dir() {
        std::fs::remove_dir_all(archive_root).map_err(|e| BackupError::io(archive_root, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_dir_of_nested_and_top_level_files() {
        let root = Path::new("/archive");
        assert_eq!(
            relative_dir(root, Path::new("/archive/P1/wiki/W1.zip")).unwrap(),
            "P1/wiki"
        );
        assert_eq!(relative_dir(root, Path::new("/archive/loose.zip")).unwrap(), "");
        assert!(relative_dir(root, Path::new("/elsewhere/x.zip")).is_err());
    }
}
