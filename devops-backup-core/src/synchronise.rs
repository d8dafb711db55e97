//! Project sync orchestration: brings every unit's working copy up to date.
//!
//! For each project returned by the [`ProjectCatalog`], the orchestrator lists and syncs
//! repositories, then wikis, then TFVC content. Listings are fetched per project, as they
//! are needed, never as one catalog up front.
//!
//! # Failure isolation
//! A failing unit (or a failing per-project listing) is logged with its project and unit,
//! recorded as a [`Failure`], and processing moves on to the next unit. Only a failure to
//! list the projects themselves aborts the sync.
//!
//! # Output
//! [`SyncOutcome`] carries the [`ChangeSet`] of every unit whose working copy was created
//! or mutated, plus the recorded failures.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::contract::{ProjectCatalog, SnapshotSource, VersionControl};
use crate::error::{BackupError, Result};
use crate::snapshot::{needs_update, remove_partial, LegacySnapshotter};
use crate::unit::{ChangeSet, Unit, UnitKind};

/// Pipeline stage a stage-level failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Mirror,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Mirror => "mirror",
        })
    }
}

/// What a recorded failure was scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureScope {
    /// Syncing a single unit failed.
    Unit {
        project: String,
        kind: UnitKind,
        name: String,
    },
    /// Listing one kind of unit for a project failed; none of those units were synced.
    Listing { project: String, kind: UnitKind },
    /// The unit at this local path synced but could not be archived.
    Archive { local_path: String },
    /// A whole stage failed.
    Stage(Stage),
}

impl fmt::Display for FailureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureScope::Unit {
                project,
                kind,
                name,
            } => write!(f, "{kind} '{name}' in project '{project}'"),
            FailureScope::Listing { project, kind } => {
                write!(f, "{kind} listing of project '{project}'")
            }
            FailureScope::Archive { local_path } => write!(f, "archive of '{local_path}'"),
            FailureScope::Stage(stage) => write!(f, "{stage} stage"),
        }
    }
}

#[derive(Debug)]
pub struct Failure {
    pub scope: FailureScope,
    pub error: BackupError,
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub changes: ChangeSet,
    pub failures: Vec<Failure>,
}

impl SyncOutcome {
    fn record_unit(&mut self, unit: &Unit, result: Result<bool>) {
        match result {
            Ok(has_changes) => {
                info!(
                    project = unit.project(),
                    kind = %unit.kind(),
                    unit = unit.name(),
                    has_changes,
                    "[SYNC] Synced unit"
                );
                if has_changes {
                    self.changes.insert(unit.local_path());
                }
            }
            Err(e) => {
                error!(
                    project = unit.project(),
                    kind = %unit.kind(),
                    unit = unit.name(),
                    error = %e,
                    "[SYNC][ERROR] Unit sync failed"
                );
                self.failures.push(Failure {
                    scope: FailureScope::Unit {
                        project: unit.project().to_string(),
                        kind: unit.kind(),
                        name: unit.name().to_string(),
                    },
                    error: e,
                });
            }
        }
    }

    fn record_listing_failure(&mut self, project: &str, kind: UnitKind, e: BackupError) {
        error!(project, kind = %kind, error = %e, "[SYNC][ERROR] Listing units failed");
        self.failures.push(Failure {
            scope: FailureScope::Listing {
                project: project.to_string(),
                kind,
            },
            error: e,
        });
    }
}

/// Syncs every unit of every project into the clone root.
///
/// Returns `Err` only when the project list itself cannot be fetched.
pub async fn sync_projects<C, V, S>(
    config: &PipelineConfig,
    catalog: &C,
    vcs: &V,
    snapshots: &S,
) -> Result<SyncOutcome>
where
    C: ProjectCatalog + ?Sized,
    V: VersionControl + ?Sized,
    S: SnapshotSource + ?Sized,
{
    let projects = catalog.list_projects().await?;
    info!(projects = projects.len(), "[SYNC] Listed projects");

    let syncer = UnitSyncer {
        clone_root: &config.clone_root,
        max_age: config.legacy_max_age(),
        vcs,
        snapshotter: LegacySnapshotter::new(snapshots),
    };

    let mut outcome = SyncOutcome::default();
    for project in &projects {
        match catalog.list_repos(project).await {
            Ok(repos) => {
                for repo in repos {
                    let unit = Unit::Repository {
                        project: project.clone(),
                        name: repo.name,
                        remote_url: repo.remote_url,
                    };
                    let result = syncer.sync(&unit).await;
                    outcome.record_unit(&unit, result);
                }
            }
            Err(e) => outcome.record_listing_failure(project, UnitKind::Repository, e),
        }

        match catalog.list_wikis(project).await {
            Ok(wikis) => {
                for wiki in wikis {
                    let unit = Unit::Wiki {
                        project: project.clone(),
                        name: wiki.name,
                        remote_url: wiki.remote_url,
                    };
                    let result = syncer.sync(&unit).await;
                    outcome.record_unit(&unit, result);
                }
            }
            Err(e) => outcome.record_listing_failure(project, UnitKind::Wiki, e),
        }

        match catalog.list_legacy_units(project).await {
            Ok(legacy) => {
                for legacy_repo in legacy {
                    let unit = Unit::LegacyProject {
                        project: project.clone(),
                        name: legacy_repo.name,
                    };
                    let result = syncer.sync(&unit).await;
                    outcome.record_unit(&unit, result);
                }
            }
            Err(e) => outcome.record_listing_failure(project, UnitKind::LegacyProject, e),
        }
    }

    info!(
        changes = outcome.changes.len(),
        failures = outcome.failures.len(),
        "[SYNC] Finished syncing projects"
    );
    Ok(outcome)
}

struct UnitSyncer<'a, V: ?Sized, S: SnapshotSource + ?Sized> {
    clone_root: &'a Path,
    max_age: std::time::Duration,
    vcs: &'a V,
    snapshotter: LegacySnapshotter<'a, S>,
}

impl<'a, V, S> UnitSyncer<'a, V, S>
where
    V: VersionControl + ?Sized,
    S: SnapshotSource + ?Sized,
{
    fn path_of(&self, unit: &Unit) -> PathBuf {
        self.clone_root.join(unit.local_path())
    }

    async fn sync(&self, unit: &Unit) -> Result<bool> {
        let path = self.path_of(unit);
        match unit {
            Unit::Repository { remote_url, .. } | Unit::Wiki { remote_url, .. } => {
                self.vcs.sync(remote_url, &path).await
            }
            Unit::LegacyProject { project, .. } => {
                if !needs_update(&path, self.max_age) {
                    info!(
                        project = project.as_str(),
                        path = %path.display(),
                        "[SYNC] Recent snapshot exists, skipping download"
                    );
                    return Ok(false);
                }
                let result = self.snapshotter.sync(project, &path).await;
                if result.is_err() {
                    remove_partial(&path).await;
                }
                result
            }
        }
    }
}
