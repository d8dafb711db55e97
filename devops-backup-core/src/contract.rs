//! # contract: collaborator interfaces of the backup pipeline
//!
//! The pipeline never talks to Azure DevOps, git or SharePoint directly. It drives four
//! traits defined here:
//!
//! - [`ProjectCatalog`]: lists projects and, per project, repositories, wikis and TFVC content.
//! - [`VersionControl`]: clone-or-update a working copy and report whether it changed.
//! - [`SnapshotSource`]: download a full-tree zip for projects without incremental sync.
//! - [`RemoteStore`]: create folders and upload files at the mirror destination.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so the binary crate and the integration tests can
//!   build deterministic mocks (`MockProjectCatalog`, `MockRemoteStore`, ...).
//!
//! ## Adding New Platforms
//! - Implement the traits for the new platform client and hand it to [`crate::pipeline::run_backup`].
//! - Map transport errors onto [`BackupError`] variants; never panic on remote failures.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use crate::error::Result;

/// A git-backed repository as listed by the catalog (ordinary repository or wiki backing repo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub name: String,
    /// Clone URL of the repository.
    pub remote_url: String,
}

/// A legacy (TFVC) unit of a project. TFVC exposes at most one per project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRepo {
    pub name: String,
}

/// Lists the backup-able content of the hosted platform.
///
/// Per-project listings are requested lazily by the orchestrator, one project at a time.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    /// Names of all projects in the organization.
    async fn list_projects(&self) -> Result<BTreeSet<String>>;

    async fn list_repos(&self, project: &str) -> Result<Vec<RemoteRepo>>;

    /// Wikis of the project, each resolved to its backing repository.
    async fn list_wikis(&self, project: &str) -> Result<Vec<RemoteRepo>>;

    /// Legacy units of the project; empty when the project has no TFVC content.
    async fn list_legacy_units(&self, project: &str) -> Result<Vec<LegacyRepo>>;
}

/// Clone-or-update primitive for version-controlled content.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Synchronises `local_path` with `remote_url`.
    ///
    /// Returns `true` when the working copy was created or new commits were integrated,
    /// `false` when it already matched the remote.
    async fn sync(&self, remote_url: &str, local_path: &Path) -> Result<bool>;
}

/// Full-tree snapshot download for version-control systems without incremental sync.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Writes a zip of the project's complete tree to `dest_path`.
    ///
    /// Implementations may leave a partially written file behind on failure;
    /// the snapshotter is responsible for removing it.
    async fn download_zip(&self, project: &str, dest_path: &Path) -> Result<()>;
}

/// Remote document store the archive root is mirrored into.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Ensures `relative_dir` (`/`-separated) exists below `root`. Must be idempotent.
    async fn ensure_dir(&self, root: &str, relative_dir: &str) -> Result<()>;

    /// Uploads `local_file` into `root/relative_dir`, replacing any existing file.
    async fn upload_file(&self, root: &str, relative_dir: &str, local_file: &Path) -> Result<()>;
}
