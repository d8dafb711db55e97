/// # devops-backup CLI Interface
///
/// Command parsing and orchestration glue for the `devops-backup` binary.
///
/// All pipeline logic (sync, archive, mirror) lives in the [`devops-backup-core`] crate; this
/// module only loads configuration, builds the Azure DevOps, git and SharePoint adapters and maps
/// the run outcome to a process exit code.
///
/// ## Exit codes
/// - `0`: every unit synced and every stage succeeded
/// - `1`: at least one unit or stage failed, or the run aborted
/// - `2`: configuration could not be loaded; no sync work was attempted
///
/// [`devops-backup-core`]: ../../devops_backup_core/
use crate::azure_devops::DevOpsClient;
use crate::debug::{wait_for_debugger, DEFAULT_POLL_INTERVAL};
use crate::load_config::load_config;
use crate::sharepoint::SharePointClient;
use anyhow::Result;
use clap::{Parser, Subcommand};
use devops_backup_core::change_tracker::GitTracker;
use devops_backup_core::pipeline::run_backup;
use std::path::PathBuf;

/// Exit code for configuration errors detected before any work starts.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// CLI for devops-backup: incremental Azure DevOps backups mirrored to SharePoint.
#[derive(Parser)]
#[clap(
    name = "devops-backup",
    version,
    about = "Back up Azure DevOps repositories, wikis and TFVC projects, and mirror changed archives to SharePoint"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one backup: sync every unit, archive what changed, mirror the archives
    Run {
        /// Optional YAML config file; environment variables override its values
        #[clap(long)]
        config: Option<PathBuf>,
        /// Keep archives locally instead of uploading them
        #[clap(long)]
        no_mirror: bool,
    },
}

/// Async CLI entrypoint for `main()` and integration tests. Returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config, no_mirror } => {
            let mut config = match load_config(config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(error = %e, "Configuration error, aborting before sync");
                    println!("Configuration error: {e}");
                    return Ok(EXIT_CONFIG_ERROR);
                }
            };
            if no_mirror {
                config.pipeline.mirror_enabled = false;
            }
            config.trace_loaded();

            if config.debug_mode {
                wait_for_debugger(DEFAULT_POLL_INTERVAL).await;
            }

            let catalog = DevOpsClient::new(&config.devops)?;
            let git = GitTracker::with_token(&config.devops.personal_access_token);
            let store = SharePointClient::new(&config.sharepoint)?;

            tracing::info!(command = "run", "Starting backup");
            match run_backup(&config.pipeline, &catalog, &git, &catalog, &store).await {
                Ok(report) => {
                    report.trace_summary();
                    Ok(report.exit_code())
                }
                Err(e) => {
                    tracing::error!(command = "run", error = %e, "Backup run aborted");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}
