//! Unit tests for bootstrap configuration and graceful degradation
//!
//! Tests verify:
//! - Missing config files do not abort startup (compiled defaults are used)
//! - Priority order for config file resolution (CLI > env > user file)
//! - Partial TOML files fall back to per-field defaults
//!
//! Note: Uses serial_test to prevent environment variable races between tests
//! that manipulate PPC_CONFIG.

use ppc_common::config::{load_or_default, load_toml_config, resolve_config_path, TomlConfig};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_compiled_defaults() {
    let config = TomlConfig::default();
    assert_eq!(config.port, 5790);
    assert!(config.worker_enabled);
    assert_eq!(config.logging.level, "info");
    assert!(config.database_path().ends_with("ppc.db"));
}

#[test]
fn test_partial_toml_uses_field_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = 6001\n").unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.port, 6001);
    assert!(config.worker_enabled);
    assert_eq!(config.logging.level, "info");
    assert!(config.database_path.is_none());
}

#[test]
fn test_full_toml_parses() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
database_path = "/tmp/ppc-test.db"
port = 7000
worker_enabled = false

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.database_path(), PathBuf::from("/tmp/ppc-test.db"));
    assert_eq!(config.port, 7000);
    assert!(!config.worker_enabled);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_invalid_toml_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"\n").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"));
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var("PPC_CONFIG", "/tmp/from-env.toml");
    let cli = PathBuf::from("/tmp/from-cli.toml");

    let resolved = resolve_config_path(Some(&cli), "PPC_CONFIG");
    assert_eq!(resolved, Some(cli));

    env::remove_var("PPC_CONFIG");
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var("PPC_CONFIG", "/tmp/from-env.toml");

    let resolved = resolve_config_path(None, "PPC_CONFIG");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));

    env::remove_var("PPC_CONFIG");
}

#[test]
#[serial]
fn test_missing_config_file_degrades_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    let config = load_or_default(Some(&missing), "PPC_CONFIG");
    assert_eq!(config.port, TomlConfig::default().port);
}
