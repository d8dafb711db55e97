//! Archive builder: turns a [`ChangeSet`] into one archive per changed unit.
//!
//! Working trees are compressed into `{archive_root}/{local_path}.zip`. Units whose local
//! path already names a zip (TFVC snapshots) are copied byte for byte to
//! `{archive_root}/{local_path}` instead of being compressed twice.
//!
//! Everything here is blocking file and zip I/O; async callers run it on the blocking pool.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{BackupError, Result};
use crate::unit::{ChangeSet, ZIP_SUFFIX};

/// How an archive entry was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMethod {
    Compressed,
    Copied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedEntry {
    /// The ChangeSet member this archive was built from.
    pub local_path: String,
    pub archive_path: PathBuf,
    pub method: ArchiveMethod,
}

/// What the archive stage produced: the archives it built and the changes it could not archive.
#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    pub archived: Vec<ArchivedEntry>,
    /// ChangeSet members whose archive failed, with the error.
    pub failed: Vec<(String, BackupError)>,
}

/// Builds one archive below `archive_root` for every member of `changes`.
///
/// An empty change set touches nothing on disk. A member that cannot be archived is recorded
/// in [`ArchiveOutcome::failed`] and the remaining members are still archived. Only failing
/// to create `archive_root` itself is an error.
pub fn archive_changes(
    clone_root: &Path,
    archive_root: &Path,
    changes: &ChangeSet,
) -> Result<ArchiveOutcome> {
    let mut outcome = ArchiveOutcome::default();
    if changes.is_empty() {
        info!("[ARCHIVE] No changes detected");
        return Ok(outcome);
    }
    fs::create_dir_all(archive_root).map_err(|e| BackupError::io(archive_root, e))?;

    for change in changes.iter() {
        match archive_change(clone_root, archive_root, change) {
            Ok(entry) => outcome.archived.push(entry),
            Err(e) => {
                error!(change, error = %e, "[ARCHIVE][ERROR] Failed to archive change, continuing");
                outcome.failed.push((change.to_string(), e));
            }
        }
    }

    info!(
        archives = outcome.archived.len(),
        failed = outcome.failed.len(),
        "[ARCHIVE] Archived changes"
    );
    Ok(outcome)
}

fn archive_change(clone_root: &Path, archive_root: &Path, change: &str) -> Result<ArchivedEntry> {
    ensure_relative(change)?;
    let source = clone_root.join(change);

    if change.ends_with(ZIP_SUFFIX) {
        let dest = archive_root.join(change);
        info!(change, dest = %dest.display(), "[ARCHIVE] Copying zipped file");
        copy_archive(&source, &dest)?;
        Ok(ArchivedEntry {
            local_path: change.to_string(),
            archive_path: dest,
            method: ArchiveMethod::Copied,
        })
    } else {
        let dest = archive_root.join(format!("{change}{ZIP_SUFFIX}"));
        info!(change, dest = %dest.display(), "[ARCHIVE] Archiving changes");
        let entries = compress_dir(&source, &dest)?;
        debug!(change, entries, "[ARCHIVE] Wrote archive");
        Ok(ArchivedEntry {
            local_path: change.to_string(),
            archive_path: dest,
            method: ArchiveMethod::Compressed,
        })
    }
}

/// Change paths are joined onto both roots, so they must stay inside them.
fn ensure_relative(change: &str) -> Result<()> {
    let path = Path::new(change);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if change.is_empty() || escapes {
        return Err(BackupError::InvalidPath {
            path: path.to_path_buf(),
            reason: "change paths must be relative and stay below the clone root",
        });
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
    }
    Ok(())
}

fn copy_archive(source: &Path, dest: &Path) -> Result<()> {
    create_parent(dest)?;
    if let Err(e) = fs::copy(source, dest) {
        let _ = fs::remove_file(dest);
        return Err(BackupError::io(source, e));
    }
    Ok(())
}

/// Compresses the contents of `source_dir` into a new zip at `dest`.
///
/// Entry names are relative to `source_dir` and use `/` separators. Returns the number of
/// entries written. A failed archive is removed rather than left half-written.
pub fn compress_dir(source_dir: &Path, dest: &Path) -> Result<usize> {
    if !source_dir.is_dir() {
        return Err(BackupError::InvalidPath {
            path: source_dir.to_path_buf(),
            reason: "working tree to archive is not a directory",
        });
    }
    create_parent(dest)?;

    let result = write_zip(source_dir, dest);
    if let Err(e) = &result {
        error!(dest = %dest.display(), error = %e, "[ARCHIVE][ERROR] Failed to write archive");
        let _ = fs::remove_file(dest);
    }
    result
}

fn write_zip(source_dir: &Path, dest: &Path) -> Result<usize> {
    let file = File::create(dest).map_err(|e| BackupError::io(dest, e))?;
    let mut zip = ZipWriter::new(file);

    let mut entries = 0;
    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let name = entry_name(source_dir, path)?;

        // Symlinks are stored as the file they point at; dangling ones and links to
        // directories are skipped since the walk does not follow them.
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if entry.path_is_symlink() => {
                debug!(path = %path.display(), error = ?e, "Skipping dangling symlink");
                continue;
            }
            Err(e) => return Err(BackupError::io(path, e)),
        };

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), file_options())?;
        } else if metadata.is_file() {
            let options = file_options()
                .large_file(metadata.len() >= u64::from(u32::MAX))
                .unix_permissions(permissions_of(&metadata));
            zip.start_file(name, options)?;
            let mut source = File::open(path).map_err(|e| BackupError::io(path, e))?;
            io::copy(&mut source, &mut zip).map_err(|e| BackupError::io(path, e))?;
        } else {
            debug!(path = %path.display(), "Skipping non-regular file");
            continue;
        }
        entries += 1;
    }

    zip.finish()?;
    Ok(entries)
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| BackupError::InvalidPath {
            path: path.to_path_buf(),
            reason: "walked entry is outside the archived directory",
        })?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(segments.join("/"))
}

#[cfg(unix)]
fn permissions_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permissions_of(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_paths_escaping_the_roots() {
        assert!(ensure_relative("P1/git/repo").is_ok());
        assert!(ensure_relative("../outside").is_err());
        assert!(ensure_relative("/etc/passwd").is_err());
        assert!(ensure_relative("").is_err());
    }
}
