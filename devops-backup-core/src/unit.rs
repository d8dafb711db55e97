//! Backup units and the set of units changed during a run.
//!
//! A [`Unit`] is rebuilt from the catalog listing on every run; it has no identity
//! beyond the local path it derives. The [`ChangeSet`] collects those local paths for
//! every unit whose working copy was created or mutated.

use std::collections::BTreeSet;
use std::fmt;

/// File name of the full-tree TFVC snapshot kept per project.
pub const LEGACY_SNAPSHOT_FILE: &str = "tfs_repo_backup.zip";

/// Suffix that marks an already-compressed artifact.
pub const ZIP_SUFFIX: &str = ".zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Repository,
    Wiki,
    LegacyProject,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Repository => "repository",
            UnitKind::Wiki => "wiki",
            UnitKind::LegacyProject => "legacy",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backup-able item of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// A git repository, synced into `{project}/git/{name}`.
    Repository {
        project: String,
        name: String,
        remote_url: String,
    },
    /// A wiki backed by a git repository, synced into `{project}/wiki/{name}`.
    Wiki {
        project: String,
        name: String,
        remote_url: String,
    },
    /// A TFVC project snapshot, stored as `{project}/tfs_repo_backup.zip`.
    LegacyProject { project: String, name: String },
}

impl Unit {
    pub fn kind(&self) -> UnitKind {
        match self {
            Unit::Repository { .. } => UnitKind::Repository,
            Unit::Wiki { .. } => UnitKind::Wiki,
            Unit::LegacyProject { .. } => UnitKind::LegacyProject,
        }
    }

    pub fn project(&self) -> &str {
        match self {
            Unit::Repository { project, .. }
            | Unit::Wiki { project, .. }
            | Unit::LegacyProject { project, .. } => project,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Unit::Repository { name, .. }
            | Unit::Wiki { name, .. }
            | Unit::LegacyProject { name, .. } => name,
        }
    }

    /// Path of the unit's working copy relative to the clone root, `/`-separated.
    pub fn local_path(&self) -> String {
        match self {
            Unit::Repository { project, name, .. } => format!("{project}/git/{name}"),
            Unit::Wiki { project, name, .. } => format!("{project}/wiki/{name}"),
            Unit::LegacyProject { project, .. } => format!("{project}/{LEGACY_SNAPSHOT_FILE}"),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' in project '{}'", self.kind(), self.name(), self.project())
    }
}

/// Local paths, relative to the clone root, of the units changed during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    paths: BTreeSet<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a changed unit. Returns false when the path was already present.
    pub fn insert(&mut self, local_path: impl Into<String>) -> bool {
        self.paths.insert(local_path.into())
    }

    pub fn contains(&self, local_path: &str) -> bool {
        self.paths.contains(local_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        ChangeSet {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}
