use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use devops_backup_core::contract::MockSnapshotSource;
use devops_backup_core::snapshot::{needs_update, needs_update_at, LegacySnapshotter};
use devops_backup_core::BackupError;
use filetime::{set_file_mtime, FileTime};
use tempfile::tempdir;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[test]
fn staleness_gate_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tfs_repo_backup.zip");
    fs::write(&path, b"snapshot").unwrap();

    let modified = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    set_file_mtime(&path, FileTime::from_system_time(modified)).unwrap();

    let max_age = 10 * DAY;
    let cases = [
        ("just written", Duration::ZERO, false),
        ("nine days old", 9 * DAY, false),
        ("one second short", max_age - Duration::from_secs(1), false),
        ("exactly ten days", max_age, true),
        ("a month old", 30 * DAY, true),
    ];

    for (name, age, expected) in cases {
        assert_eq!(
            needs_update_at(&path, max_age, modified + age),
            expected,
            "{name}"
        );
    }
}

#[test]
fn staleness_gate_uses_the_current_time() {
    let dir = tempdir().unwrap();
    let fresh = dir.path().join("fresh.zip");
    let stale = dir.path().join("stale.zip");
    fs::write(&fresh, b"fresh").unwrap();
    fs::write(&stale, b"stale").unwrap();
    set_file_mtime(
        &stale,
        FileTime::from_system_time(SystemTime::now() - 11 * DAY),
    )
    .unwrap();

    assert!(!needs_update(&fresh, 10 * DAY));
    assert!(needs_update(&stale, 10 * DAY));
    assert!(needs_update(&dir.path().join("absent.zip"), 10 * DAY));
}

#[tokio::test]
async fn failed_download_leaves_no_partial_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Legacy/tfs_repo_backup.zip");

    let mut source = MockSnapshotSource::new();
    source
        .expect_download_zip()
        .times(1)
        .returning(|project: &str, dest: &Path| {
            fs::write(dest, b"PK\x03\x04 truncated").unwrap();
            Err(BackupError::Snapshot {
                project: project.to_string(),
                message: "connection reset".into(),
            })
        });

    let result = LegacySnapshotter::new(&source).sync("Legacy", &path).await;

    assert!(matches!(result, Err(BackupError::Snapshot { .. })));
    assert!(!path.exists(), "partial snapshot must be removed");
}

#[tokio::test]
async fn existing_snapshot_is_replaced_and_reported_changed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Legacy/tfs_repo_backup.zip");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"old snapshot").unwrap();

    let mut source = MockSnapshotSource::new();
    source
        .expect_download_zip()
        .withf(|project: &str, _dest: &Path| project == "Legacy")
        .times(1)
        .returning(|_project: &str, dest: &Path| {
            fs::write(dest, b"new snapshot").unwrap();
            Ok(())
        });

    let changed = LegacySnapshotter::new(&source)
        .sync("Legacy", &path)
        .await
        .unwrap();

    assert!(changed);
    assert_eq!(fs::read(&path).unwrap(), b"new snapshot");
}
