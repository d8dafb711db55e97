use assert_cmd::Command;
use predicates::prelude::*;
use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("devops-backup").expect("Binary exists");
    cmd.env_clear();
    cmd
}

#[test]
fn run_without_environment_exits_with_config_error() {
    bin()
        .arg("run")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("DEVOPS_PAT").and(predicate::str::contains("PATH_ARCHIVE")));
}

#[test]
fn overlapping_roots_exit_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let clone = dir.path().join("backup");
    let archive = clone.join("archive");

    bin()
        .arg("run")
        .env("DEVOPS_PAT", "pat")
        .env("DEVOPS_ORGANIZATION_URL", "https://dev.azure.com/contoso")
        .env("PATH_CLONE", &clone)
        .env("PATH_ARCHIVE", &archive)
        .env("SHAREPOINT_URL", "https://contoso.sharepoint.com/sites/it")
        .env("SHAREPOINT_DIR", "Shared Documents/DevOps")
        .env("SHAREPOINT_CLIENT_ID", "id")
        .env("SHAREPOINT_CLIENT_SECRET", "secret")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("disjoint"));
}

#[test]
fn unreadable_config_file_exits_with_config_error() {
    bin()
        .args(["run", "--config", "/definitely/not/here.yaml"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Failed to read config file"));
}

#[test]
fn help_lists_run_command() {
    bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"));
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use devops_backup::cli::{run, Cli, Commands};

    // A missing config file fails fast, before any network access.
    let cli = Cli {
        command: Commands::Run {
            config: Some(std::path::PathBuf::from("dummy.yaml")),
            no_mirror: true,
        },
    };

    let code = run(cli).await.expect("config errors map to an exit code");
    assert_eq!(code, devops_backup::cli::EXIT_CONFIG_ERROR);

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
