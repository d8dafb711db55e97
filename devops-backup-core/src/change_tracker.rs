//! Git-backed change tracking.
//!
//! [`GitTracker`] implements [`VersionControl`] over the `git` executable. A working copy
//! that does not exist yet is cloned and reported as changed. An existing one is fetched and
//! reset onto its upstream; it is reported as changed only when the fingerprint of its refs
//! moved, so a run against an unchanged remote reports nothing.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::contract::VersionControl;
use crate::error::{BackupError, Result};

const GIT_PROGRAM: &str = "git";

#[derive(Debug, Clone)]
pub struct GitTracker {
    program: String,
    /// Extra HTTP header carrying the credentials, kept out of the stored remote URL.
    auth_header: Option<String>,
}

impl Default for GitTracker {
    fn default() -> Self {
        Self {
            program: GIT_PROGRAM.to_string(),
            auth_header: None,
        }
    }
}

impl GitTracker {
    /// Tracker for remotes that need no credentials (local paths, public URLs).
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker authenticating with a personal access token as HTTP basic credentials.
    pub fn with_token(token: &str) -> Self {
        let encoded = STANDARD.encode(format!(":{token}"));
        Self {
            auth_header: Some(format!("Authorization: Basic {encoded}")),
            ..Self::default()
        }
    }

    /// Runs `program` instead of the `git` found on `PATH`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn launch_error(operation: &'static str, target: &str, e: std::io::Error) -> BackupError {
        error!(error = ?e, operation, target, "Failed to launch git process");
        BackupError::Git {
            operation,
            target: target.to_string(),
            message: format!("failed to launch git: {e}"),
        }
    }

    fn git(&self, work_dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(header) = &self.auth_header {
            cmd.arg("-c").arg(format!("http.extraHeader={header}"));
        }
        if let Some(dir) = work_dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run(&self, operation: &'static str, target: &str, mut cmd: Command) -> Result<String> {
        let output = cmd
            .output()
            .await
            .map_err(|e| Self::launch_error(operation, target, e))?;

        if output.status.success() {
            debug!(operation, target, status = ?output.status, "git command succeeded");
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(operation, target, status = ?output.status, stderr = %stderr, "git exited with non-zero code");
        Err(BackupError::Git {
            operation,
            target: target.to_string(),
            message: format!("{}: {stderr}", output.status),
        })
    }

    async fn clone_repo(&self, remote_url: &str, local_path: &Path) -> Result<()> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::io(parent, e))?;
        }
        let mut cmd = self.git(None);
        cmd.arg("clone").arg("--no-progress").arg(remote_url).arg(local_path);
        self.run("clone", remote_url, cmd).await?;
        info!(remote_url, path = %local_path.display(), "Cloned git repository");
        Ok(())
    }

    /// SHA-256 over `git show-ref`, covering local branches, remote-tracking refs and tags.
    async fn ref_fingerprint(&self, local_path: &Path) -> Result<String> {
        let target = local_path.display().to_string();
        let mut cmd = self.git(Some(local_path));
        cmd.arg("show-ref");
        let output = cmd
            .output()
            .await
            .map_err(|e| Self::launch_error("show-ref", &target, e))?;

        // show-ref exits with 1 when the repository has no refs at all.
        let refs = match output.status.code() {
            Some(0) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Some(1) if output.stdout.is_empty() => String::new(),
            _ => {
                return Err(BackupError::Git {
                    operation: "show-ref",
                    target,
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(refs.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    async fn update(&self, local_path: &Path) -> Result<()> {
        let target = local_path.display().to_string();

        let mut fetch = self.git(Some(local_path));
        fetch.args(["fetch", "--prune", "--tags", "--no-progress", "origin"]);
        self.run("fetch", &target, fetch).await?;

        if !self.has_upstream(local_path).await? {
            warn!(path = %target, "No upstream branch, skipping fast-forward");
            return Ok(());
        }

        let mut reset = self.git(Some(local_path));
        reset.args(["reset", "--hard", "--quiet", "@{u}"]);
        self.run("reset", &target, reset).await?;
        Ok(())
    }

    /// Empty remotes and detached checkouts have no upstream to move onto.
    async fn has_upstream(&self, local_path: &Path) -> Result<bool> {
        let target = local_path.display().to_string();
        let mut cmd = self.git(Some(local_path));
        cmd.args(["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"]);
        let output = cmd
            .output()
            .await
            .map_err(|e| Self::launch_error("rev-parse", &target, e))?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl VersionControl for GitTracker {
    async fn sync(&self, remote_url: &str, local_path: &Path) -> Result<bool> {
        if !local_path.join(".git").exists() {
            if local_path.exists() {
                // Left behind by an interrupted clone.
                warn!(path = %local_path.display(), "Removing incomplete working copy before clone");
                tokio::fs::remove_dir_all(local_path)
                    .await
                    .map_err(|e| BackupError::io(local_path, e))?;
            }
            self.clone_repo(remote_url, local_path).await?;
            return Ok(true);
        }

        let before = self.ref_fingerprint(local_path).await?;
        self.update(local_path).await?;
        let after = self.ref_fingerprint(local_path).await?;

        let changed = before != after;
        debug!(
            remote_url,
            path = %local_path.display(),
            before = &before[..12],
            after = &after[..12],
            changed,
            "Compared ref fingerprints"
        );
        Ok(changed)
    }
}
