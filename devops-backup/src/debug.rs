/// Debug mode: hold the run until a debugger has attached to the process.
///
/// On Linux the kernel reports the attached tracer in `/proc/self/status` (`TracerPid:`).
/// Other platforms log a warning and continue immediately.
use std::time::Duration;
use tracing::{info, warn};

const STATUS_PATH: &str = "/proc/self/status";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn wait_for_debugger(poll_interval: Duration) {
    let pid = std::process::id();
    info!(pid, "Debug mode is on. Waiting for debugger to attach...");

    if !cfg!(target_os = "linux") {
        warn!("Debugger detection is only supported on Linux; continuing");
        return;
    }

    loop {
        match tokio::fs::read_to_string(STATUS_PATH).await {
            Ok(status) => {
                if let Some(tracer) = parse_tracer_pid(&status) {
                    info!(pid, tracer, "Debugger attached");
                    return;
                }
            }
            Err(e) => {
                warn!(error = ?e, path = STATUS_PATH, "Cannot read process status; continuing without debugger");
                return;
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Pid of the attached tracer, or `None` when nothing is attached.
fn parse_tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|pid| *pid != 0)
}
