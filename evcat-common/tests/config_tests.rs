//! Configuration and root folder resolution tests
//!
//! Tests that manipulate EVCAT_ROOT_FOLDER are marked #[serial] so they do not
//! race on the process environment.

use evcat_common::config::{prepare_root_folder, resolve_root_folder, TomlConfig, ROOT_FOLDER_ENV};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/evcat-from-env");
    let toml_config = TomlConfig {
        root_folder: Some("/tmp/evcat-from-toml".to_string()),
        ..Default::default()
    };

    let resolved = resolve_root_folder(Some(Path::new("/tmp/evcat-from-cli")), &toml_config);
    assert_eq!(resolved, PathBuf::from("/tmp/evcat-from-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_environment_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/evcat-from-env");
    let toml_config = TomlConfig {
        root_folder: Some("/tmp/evcat-from-toml".to_string()),
        ..Default::default()
    };

    let resolved = resolve_root_folder(None, &toml_config);
    assert_eq!(resolved, PathBuf::from("/tmp/evcat-from-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_used_without_cli_or_env() {
    env::remove_var(ROOT_FOLDER_ENV);
    let toml_config = TomlConfig {
        root_folder: Some("/tmp/evcat-from-toml".to_string()),
        ..Default::default()
    };

    let resolved = resolve_root_folder(None, &toml_config);
    assert_eq!(resolved, PathBuf::from("/tmp/evcat-from-toml"));
}

#[test]
#[serial]
fn test_default_root_folder_is_not_empty() {
    env::remove_var(ROOT_FOLDER_ENV);
    let resolved = resolve_root_folder(None, &TomlConfig::default());
    assert!(!resolved.as_os_str().is_empty());
    assert!(resolved.to_string_lossy().contains("evcat"));
}

#[test]
fn test_parse_dq_section() {
    let config = TomlConfig::parse(
        r#"
        root_folder = "/srv/evcat"

        [dq]
        recurrence_min_count = 4
        page_size = 250
        preserve_existing_signals = false
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder.as_deref(), Some("/srv/evcat"));
    assert_eq!(config.dq.recurrence_min_count, Some(4));
    assert_eq!(config.dq.page_size, Some(250));
    assert_eq!(config.dq.preserve_existing_signals, Some(false));
    assert!(config.dq.dedup_lookback_days.is_none());
}

#[test]
fn test_empty_config_is_valid() {
    let config = TomlConfig::parse("").unwrap();
    assert!(config.root_folder.is_none());
    assert!(config.dq.page_size.is_none());
}

#[test]
fn test_invalid_config_is_config_error() {
    let result = TomlConfig::parse("page_size = [");
    assert!(matches!(result, Err(evcat_common::Error::Config(_))));
}

#[test]
fn test_prepare_root_folder_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested").join("evcat");

    let db_path = prepare_root_folder(&root).unwrap();

    assert!(root.is_dir());
    assert_eq!(db_path, root.join("evcat.db"));
}
