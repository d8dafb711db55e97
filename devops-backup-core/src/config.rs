use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Snapshots younger than this are not downloaded again.
pub const DEFAULT_LEGACY_MAX_AGE_DAYS: u64 = 10;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Settings the pipeline itself needs. Platform coordinates and secrets live in the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Persistent working copies, kept across runs.
    pub clone_root: PathBuf,
    /// Per-run archives, removed once mirrored.
    pub archive_root: PathBuf,
    /// Folder at the remote store the archive root is mirrored into.
    pub remote_root: String,
    pub mirror_enabled: bool,
    pub legacy_max_age_days: u64,
}

impl PipelineConfig {
    pub fn new(clone_root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            clone_root: clone_root.into(),
            archive_root: archive_root.into(),
            remote_root: String::new(),
            mirror_enabled: true,
            legacy_max_age_days: DEFAULT_LEGACY_MAX_AGE_DAYS,
        }
    }

    pub fn legacy_max_age(&self) -> Duration {
        Duration::from_secs(self.legacy_max_age_days * SECONDS_PER_DAY)
    }

    pub fn trace_loaded(&self) {
        info!(
            clone_root = %self.clone_root.display(),
            archive_root = %self.archive_root.display(),
            remote_root = %self.remote_root,
            mirror_enabled = self.mirror_enabled,
            legacy_max_age_days = self.legacy_max_age_days,
            "Loaded pipeline config"
        );
        debug!(?self, "Pipeline config loaded (full debug)");
    }
}
