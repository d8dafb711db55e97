//! High-level pipeline: sync → archive → mirror → cleanup.
//!
//! ```text
//! START → SYNC → [changes? → ARCHIVE] → [archive root empty → DONE] → MIRROR (if enabled) → CLEANUP → DONE
//! ```
//!
//! Unit-level failures during sync or archiving never stop the run; they are collected in
//! the [`RunReport`], which decides the process exit code. A failed mirror is recorded as a
//! stage failure and leaves the archive root for the next run, which uploads it again even
//! when nothing changed in between. Failing to list projects or to create the archive root
//! aborts the run with `Err`.

use tracing::{error, info};

use crate::archive::{archive_changes, ArchiveOutcome, ArchivedEntry};
use crate::config::PipelineConfig;
use crate::contract::{ProjectCatalog, RemoteStore, SnapshotSource, VersionControl};
use crate::error::Result;
use crate::mirror::{has_pending_archives, mirror_archives, MirrorSummary};
use crate::synchronise::{sync_projects, Failure, FailureScope, Stage};
use crate::unit::ChangeSet;

/// Exit code of a run that completed without any failure.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code of a run with at least one unit- or stage-level failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// The archive root held nothing to upload.
    NothingToMirror,
    /// Mirroring is switched off; archives stay in the archive root.
    Disabled,
    Mirrored(MirrorSummary),
    /// The mirror stage failed; the failure is in [`RunReport::failures`].
    Failed,
}

/// Outcome of one backup run.
#[derive(Debug)]
pub struct RunReport {
    pub changes: ChangeSet,
    pub archived: Vec<ArchivedEntry>,
    pub mirror: MirrorOutcome,
    pub failures: Vec<Failure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// 0 when nothing failed, 1 as soon as any unit or stage failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }

    /// Logs one line per failure and a closing summary.
    pub fn trace_summary(&self) {
        for failure in &self.failures {
            error!(scope = %failure.scope, error = %failure.error, "Run failure");
        }
        info!(
            changes = self.changes.len(),
            archived = self.archived.len(),
            mirror = ?self.mirror,
            failures = self.failures.len(),
            exit_code = self.exit_code(),
            "Backup run finished"
        );
    }
}

/// Runs one complete backup.
pub async fn run_backup<C, V, S, R>(
    config: &PipelineConfig,
    catalog: &C,
    vcs: &V,
    snapshots: &S,
    store: &R,
) -> Result<RunReport>
where
    C: ProjectCatalog + ?Sized,
    V: VersionControl + ?Sized,
    S: SnapshotSource + ?Sized,
    R: RemoteStore + ?Sized,
{
    info!("[PIPELINE] Starting backup run");

    let outcome = sync_projects(config, catalog, vcs, snapshots).await?;
    let mut report = RunReport {
        changes: outcome.changes,
        archived: Vec::new(),
        mirror: MirrorOutcome::NothingToMirror,
        failures: outcome.failures,
    };

    if report.changes.is_empty() {
        info!("[PIPELINE] No changes detected, nothing to archive");
    } else {
        let archived = archive_stage(config, &report.changes).await?;
        info!(
            changes = report.changes.len(),
            archived = archived.archived.len(),
            failed = archived.failed.len(),
            "[PIPELINE] Archived changes"
        );
        report.archived = archived.archived;
        report
            .failures
            .extend(archived.failed.into_iter().map(|(local_path, error)| Failure {
                scope: FailureScope::Archive { local_path },
                error,
            }));
    }

    // Archives left by an earlier failed mirror are retried even when nothing changed.
    if !has_pending_archives(&config.archive_root)? {
        info!("[PIPELINE] Archive root is empty, nothing to mirror");
        return Ok(report);
    }

    if !config.mirror_enabled {
        info!("[PIPELINE] Skipping upload to remote store, mirroring disabled");
        report.mirror = MirrorOutcome::Disabled;
        return Ok(report);
    }
    if report.changes.is_empty() {
        info!("[PIPELINE] Uploading archives left by a previous run");
    }

    report.mirror = match mirror_archives(store, &config.remote_root, &config.archive_root).await {
        Ok(summary) => {
            info!(
                dirs = summary.dirs,
                files = summary.files,
                "[PIPELINE] Mirrored archives"
            );
            MirrorOutcome::Mirrored(summary)
        }
        Err(e) => {
            error!(error = %e, "[PIPELINE][ERROR] Mirroring failed, archive root kept for retry");
            report.failures.push(Failure {
                scope: FailureScope::Stage(Stage::Mirror),
                error: e,
            });
            MirrorOutcome::Failed
        }
    };

    Ok(report)
}

/// Runs the blocking archive builder on the blocking thread pool.
async fn archive_stage(config: &PipelineConfig, changes: &ChangeSet) -> Result<ArchiveOutcome> {
    let clone_root = config.clone_root.clone();
    let archive_root = config.archive_root.clone();
    let changes = changes.clone();
    tokio::task::spawn_blocking(move || archive_changes(&clone_root, &archive_root, &changes))
        .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackupError;

    #[test]
    fn any_failure_makes_the_run_fail() {
        let mut report = RunReport {
            changes: ChangeSet::from_iter(["P1/git/a"]),
            archived: Vec::new(),
            mirror: MirrorOutcome::Disabled,
            failures: Vec::new(),
        };
        assert_eq!(report.exit_code(), EXIT_SUCCESS);

        report.failures.push(Failure {
            scope: FailureScope::Stage(Stage::Mirror),
            error: BackupError::Remote("unreachable".into()),
        });
        assert_eq!(report.exit_code(), EXIT_FAILURE);
        assert!(!report.is_success());
    }
}
