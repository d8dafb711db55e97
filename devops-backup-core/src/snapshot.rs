//! Full-tree snapshots for version-control systems without an incremental diff.
//!
//! TFVC content is downloaded as one zip per project. Because there is no cheap way to
//! tell whether it changed, the orchestrator only asks for a new snapshot once the
//! existing one is older than the configured maximum age (see [`needs_update`]).

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{error, info, warn};

use crate::contract::SnapshotSource;
use crate::error::{BackupError, Result};

/// True when no snapshot exists at `path` or it was last modified at least `max_age` ago.
pub fn needs_update(path: &Path, max_age: Duration) -> bool {
    needs_update_at(path, max_age, SystemTime::now())
}

/// [`needs_update`] against an explicit clock.
pub fn needs_update_at(path: &Path, max_age: Duration, now: SystemTime) -> bool {
    let modified = match std::fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(_) => return true,
    };
    // A modification time in the future counts as fresh.
    match now.duration_since(modified) {
        Ok(age) => age >= max_age,
        Err(_) => false,
    }
}

/// Downloads project snapshots and guarantees no partial file survives a failure.
pub struct LegacySnapshotter<'a, S: SnapshotSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: SnapshotSource + ?Sized> LegacySnapshotter<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Downloads the project's snapshot to `path`, overwriting any previous one.
    ///
    /// There is no incremental signal, so a successful download always reports a change.
    pub async fn sync(&self, project: &str, path: &Path) -> Result<bool> {
        let existed = path.exists();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::io(parent, e))?;
        }

        if let Err(e) = self.source.download_zip(project, path).await {
            error!(project, path = %path.display(), error = %e, "Snapshot download failed");
            remove_partial(path).await;
            return Err(e);
        }

        info!(project, path = %path.display(), replaced = existed, "Downloaded snapshot");
        Ok(true)
    }
}

/// Removes a partially written snapshot so the next run treats it as absent.
pub async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            warn!(path = %path.display(), "Deleted partially downloaded snapshot");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            error!(path = %path.display(), error = ?e, "Failed to delete partial snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_snapshot_needs_update() {
        let dir = tempfile::tempdir().unwrap();
        assert!(needs_update(
            &dir.path().join("absent.zip"),
            Duration::from_secs(3600)
        ));
    }

    #[test]
    fn future_mtime_counts_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.zip");
        std::fs::write(&path, b"zip").unwrap();
        let earlier = SystemTime::now() - Duration::from_secs(3600);
        assert!(!needs_update_at(&path, Duration::from_secs(60), earlier));
    }
}
