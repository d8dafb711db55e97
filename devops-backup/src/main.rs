use clap::Parser;
use devops_backup::cli::{run, Cli};
use devops_backup::load_config::{parse_flag, ENV_DEBUG_MODE};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    // RUST_LOG wins; otherwise debug mode raises the default level.
    let default_level = match std::env::var(ENV_DEBUG_MODE) {
        Ok(raw) if parse_flag(ENV_DEBUG_MODE, &raw).unwrap_or(false) => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    tracing::info!("CLI arguments parsed, invoking run");
    match run(cli).await {
        Ok(code) => {
            tracing::info!(exit_code = code, "CLI completed");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            ExitCode::FAILURE
        }
    }
}
