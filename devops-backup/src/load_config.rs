/// `load_config` module: builds the run configuration from environment variables and an
/// optional YAML file.
///
/// # Responsibilities
/// - Parse the optional YAML file into loosely-typed sections (every key optional)
/// - Overlay environment variables (`.env` is loaded by `main`), which always win
/// - Read secrets (PAT, SharePoint client credentials) from the environment only
/// - Report every missing required setting at once, before any sync work starts
///
/// # Errors
/// All errors use `anyhow::Error` and are fatal startup errors at the CLI boundary.
use anyhow::{anyhow, bail, Context, Result};
use devops_backup_core::config::{PipelineConfig, DEFAULT_LEGACY_MAX_AGE_DAYS};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const ENV_DEVOPS_PAT: &str = "DEVOPS_PAT";
pub const ENV_DEVOPS_ORGANIZATION_URL: &str = "DEVOPS_ORGANIZATION_URL";
pub const ENV_PATH_CLONE: &str = "PATH_CLONE";
pub const ENV_PATH_ARCHIVE: &str = "PATH_ARCHIVE";
pub const ENV_SHAREPOINT_URL: &str = "SHAREPOINT_URL";
pub const ENV_SHAREPOINT_DIR: &str = "SHAREPOINT_DIR";
pub const ENV_SHAREPOINT_CLIENT_ID: &str = "SHAREPOINT_CLIENT_ID";
pub const ENV_SHAREPOINT_CLIENT_SECRET: &str = "SHAREPOINT_CLIENT_SECRET";
pub const ENV_MIRROR_ENABLED: &str = "COPY_ARCHIVES_TO_SHAREPOINT_ENABLED";
pub const ENV_DEBUG_MODE: &str = "DEBUG_MODE";
pub const ENV_LEGACY_MAX_AGE_DAYS: &str = "LEGACY_SNAPSHOT_MAX_AGE_DAYS";

/// YAML side of the configuration. Secrets are deliberately absent.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub devops: DevOpsSection,
    #[serde(default)]
    pub sharepoint: SharePointSection,
    pub mirror_enabled: Option<bool>,
    pub debug_mode: Option<bool>,
    pub legacy_max_age_days: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    pub clone: Option<PathBuf>,
    pub archive: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevOpsSection {
    pub organization_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharePointSection {
    pub url: Option<String>,
    pub dir: Option<String>,
}

#[derive(Clone)]
pub struct DevOpsSettings {
    pub organization_url: String,
    pub personal_access_token: String,
}

#[derive(Clone)]
pub struct SharePointSettings {
    pub site_url: String,
    pub dir: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for DevOpsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevOpsSettings")
            .field("organization_url", &self.organization_url)
            .field("personal_access_token", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for SharePointSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharePointSettings")
            .field("site_url", &self.site_url)
            .field("dir", &self.dir)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub devops: DevOpsSettings,
    pub sharepoint: SharePointSettings,
    pub debug_mode: bool,
}

impl AppConfig {
    pub fn trace_loaded(&self) {
        self.pipeline.trace_loaded();
        info!(
            organization_url = %self.devops.organization_url,
            sharepoint_url = %self.sharepoint.site_url,
            sharepoint_dir = %self.sharepoint.dir,
            debug_mode = self.debug_mode,
            "Loaded platform config"
        );
    }
}

/// Loads the configuration from the process environment and, when given, a YAML file.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let file = match path {
        Some(path) => read_config_file(path)?,
        None => FileConfig::default(),
    };
    resolve(file, |key| std::env::var(key).ok())
}

fn read_config_file(path: &Path) -> Result<FileConfig> {
    info!(config_path = ?path, "Loading configuration from file");
    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path, e)
    })?;

    // An empty file is a valid, empty configuration.
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }

    serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
        anyhow!("Failed to parse config YAML: {e}")
    })
}

/// Merges `file` with the variables returned by `env`; variables take precedence.
pub fn resolve<F>(file: FileConfig, env: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());
    let mut missing: Vec<&str> = Vec::new();
    let mut required = |key: &'static str, fallback: Option<String>| -> String {
        match var(key).or(fallback) {
            Some(value) => value,
            None => {
                missing.push(key);
                String::new()
            }
        }
    };

    let personal_access_token = required(ENV_DEVOPS_PAT, None);
    let organization_url = required(ENV_DEVOPS_ORGANIZATION_URL, file.devops.organization_url);
    let clone_root = required(
        ENV_PATH_CLONE,
        file.paths.clone.map(|p| p.to_string_lossy().into_owned()),
    );
    let archive_root = required(
        ENV_PATH_ARCHIVE,
        file.paths.archive.map(|p| p.to_string_lossy().into_owned()),
    );
    let site_url = required(ENV_SHAREPOINT_URL, file.sharepoint.url);
    let sharepoint_dir = required(ENV_SHAREPOINT_DIR, file.sharepoint.dir);
    let client_id = required(ENV_SHAREPOINT_CLIENT_ID, None);
    let client_secret = required(ENV_SHAREPOINT_CLIENT_SECRET, None);

    if !missing.is_empty() {
        error!(missing = ?missing, "Missing required configuration");
        bail!("Missing ENV Variable(s): {}", missing.join(", "));
    }

    let mirror_enabled = match var(ENV_MIRROR_ENABLED) {
        Some(raw) => parse_flag(ENV_MIRROR_ENABLED, &raw)?,
        None => file.mirror_enabled.unwrap_or(true),
    };
    let debug_mode = match var(ENV_DEBUG_MODE) {
        Some(raw) => parse_flag(ENV_DEBUG_MODE, &raw)?,
        None => file.debug_mode.unwrap_or(false),
    };
    let legacy_max_age_days = match var(ENV_LEGACY_MAX_AGE_DAYS) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{ENV_LEGACY_MAX_AGE_DAYS} must be a whole number of days"))?,
        None => file
            .legacy_max_age_days
            .unwrap_or(DEFAULT_LEGACY_MAX_AGE_DAYS),
    };

    let clone_root = PathBuf::from(clone_root);
    let archive_root = PathBuf::from(archive_root);
    validate_roots(&clone_root, &archive_root)?;

    let pipeline = PipelineConfig {
        clone_root,
        archive_root,
        remote_root: sharepoint_dir.trim_matches('/').to_string(),
        mirror_enabled,
        legacy_max_age_days,
    };

    Ok(AppConfig {
        pipeline,
        devops: DevOpsSettings {
            organization_url: organization_url.trim_end_matches('/').to_string(),
            personal_access_token,
        },
        sharepoint: SharePointSettings {
            site_url: site_url.trim_end_matches('/').to_string(),
            dir: sharepoint_dir,
            client_id,
            client_secret,
        },
        debug_mode,
    })
}

/// Accepts `1/0`, `true/false`, `yes/no` and `on/off`, case-insensitively.
pub fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean flag (1/0, true/false), got '{other}'"),
    }
}

/// The archive root is deleted after every mirror, so it must never overlap the clone root.
fn validate_roots(clone_root: &Path, archive_root: &Path) -> Result<()> {
    if clone_root.starts_with(archive_root) || archive_root.starts_with(clone_root) {
        bail!(
            "{ENV_PATH_CLONE} ({}) and {ENV_PATH_ARCHIVE} ({}) must be disjoint directories",
            clone_root.display(),
            archive_root.display()
        );
    }
    Ok(())
}
