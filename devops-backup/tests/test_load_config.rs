use devops_backup::load_config::*;
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

const ALL_VARS: &[&str] = &[
    ENV_DEVOPS_PAT,
    ENV_DEVOPS_ORGANIZATION_URL,
    ENV_PATH_CLONE,
    ENV_PATH_ARCHIVE,
    ENV_SHAREPOINT_URL,
    ENV_SHAREPOINT_DIR,
    ENV_SHAREPOINT_CLIENT_ID,
    ENV_SHAREPOINT_CLIENT_SECRET,
    ENV_MIRROR_ENABLED,
    ENV_DEBUG_MODE,
    ENV_LEGACY_MAX_AGE_DAYS,
];

fn clear_env() {
    for key in ALL_VARS {
        env::remove_var(key);
    }
}

fn set_secrets() {
    env::set_var(ENV_DEVOPS_PAT, "pat-from-env");
    env::set_var(ENV_SHAREPOINT_CLIENT_ID, "client-id");
    env::set_var(ENV_SHAREPOINT_CLIENT_SECRET, "client-secret");
}

fn set_all_required() {
    set_secrets();
    env::set_var(ENV_DEVOPS_ORGANIZATION_URL, "https://dev.azure.com/contoso/");
    env::set_var(ENV_PATH_CLONE, "/data/clone");
    env::set_var(ENV_PATH_ARCHIVE, "/data/archive");
    env::set_var(ENV_SHAREPOINT_URL, "https://contoso.sharepoint.com/sites/it");
    env::set_var(ENV_SHAREPOINT_DIR, "/Shared Documents/DevOps/");
}

fn yaml_file(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), content).unwrap();
    file
}

#[test]
#[serial]
fn environment_alone_is_a_complete_configuration() {
    clear_env();
    set_all_required();

    let config = load_config(None).expect("Config should load");

    assert_eq!(config.pipeline.clone_root, PathBuf::from("/data/clone"));
    assert_eq!(config.pipeline.archive_root, PathBuf::from("/data/archive"));
    assert_eq!(config.pipeline.remote_root, "Shared Documents/DevOps");
    assert_eq!(config.devops.organization_url, "https://dev.azure.com/contoso");
    assert_eq!(config.devops.personal_access_token, "pat-from-env");
    assert!(config.pipeline.mirror_enabled, "mirroring defaults to on");
    assert!(!config.debug_mode, "debug mode defaults to off");
    assert_eq!(config.pipeline.legacy_max_age_days, 10);
    clear_env();
}

#[test]
#[serial]
fn yaml_supplies_non_secret_settings() {
    clear_env();
    set_secrets();
    let file = yaml_file(
        r#"
paths:
  clone: /srv/backup/clone
  archive: /srv/backup/archive
devops:
  organization_url: https://dev.azure.com/fabrikam
sharepoint:
  url: https://fabrikam.sharepoint.com/sites/eng
  dir: Documents/Backups
mirror_enabled: false
legacy_max_age_days: 3
"#,
    );

    let config = load_config(Some(file.path())).expect("Config should load");

    assert_eq!(config.pipeline.clone_root, PathBuf::from("/srv/backup/clone"));
    assert_eq!(config.devops.organization_url, "https://dev.azure.com/fabrikam");
    assert_eq!(config.sharepoint.site_url, "https://fabrikam.sharepoint.com/sites/eng");
    assert_eq!(config.pipeline.remote_root, "Documents/Backups");
    assert!(!config.pipeline.mirror_enabled);
    assert_eq!(config.pipeline.legacy_max_age_days, 3);
    clear_env();
}

#[test]
#[serial]
fn environment_overrides_yaml() {
    clear_env();
    set_all_required();
    env::set_var(ENV_MIRROR_ENABLED, "1");
    env::set_var(ENV_LEGACY_MAX_AGE_DAYS, "30");
    let file = yaml_file(
        r#"
paths:
  clone: /srv/yaml/clone
mirror_enabled: false
legacy_max_age_days: 3
"#,
    );

    let config = load_config(Some(file.path())).expect("Config should load");

    assert_eq!(config.pipeline.clone_root, PathBuf::from("/data/clone"));
    assert!(config.pipeline.mirror_enabled);
    assert_eq!(config.pipeline.legacy_max_age_days, 30);
    clear_env();
}

#[test]
#[serial]
fn every_missing_variable_is_reported_at_once() {
    clear_env();
    env::set_var(ENV_PATH_CLONE, "/data/clone");

    let err = load_config(None).unwrap_err().to_string();

    assert!(err.contains("Missing ENV Variable(s)"), "got: {err}");
    for key in [
        ENV_DEVOPS_PAT,
        ENV_DEVOPS_ORGANIZATION_URL,
        ENV_PATH_ARCHIVE,
        ENV_SHAREPOINT_URL,
        ENV_SHAREPOINT_DIR,
        ENV_SHAREPOINT_CLIENT_ID,
        ENV_SHAREPOINT_CLIENT_SECRET,
    ] {
        assert!(err.contains(key), "{key} not reported in: {err}");
    }
    assert!(!err.contains(ENV_PATH_CLONE), "set variable reported as missing: {err}");
    clear_env();
}

#[test]
#[serial]
fn blank_variables_count_as_missing() {
    clear_env();
    set_all_required();
    env::set_var(ENV_DEVOPS_PAT, "   ");

    let err = load_config(None).unwrap_err().to_string();

    assert!(err.contains(ENV_DEVOPS_PAT), "got: {err}");
    clear_env();
}

#[test]
#[serial]
fn secrets_in_yaml_are_rejected() {
    clear_env();
    set_all_required();
    let file = yaml_file("devops:\n  personal_access_token: leaked\n");

    let err = load_config(Some(file.path())).unwrap_err().to_string();

    assert!(err.contains("parse"), "got: {err}");
    clear_env();
}

#[test]
#[serial]
fn invalid_flag_is_an_error() {
    clear_env();
    set_all_required();
    env::set_var(ENV_DEBUG_MODE, "sometimes");

    let err = load_config(None).unwrap_err().to_string();

    assert!(err.contains(ENV_DEBUG_MODE), "got: {err}");
    clear_env();
}

#[test]
#[serial]
fn empty_yaml_file_is_accepted() {
    clear_env();
    set_all_required();
    env::set_var(ENV_DEBUG_MODE, "1");
    let file = yaml_file("");

    let config = load_config(Some(file.path())).expect("Config should load");

    assert!(config.debug_mode);
    clear_env();
}
