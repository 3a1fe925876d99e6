//! CLI integration tests.
//!
//! These tests verify the CLI argument parsing and configuration loading.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use shell_jail::cli::{parse_args_from, Args};
use shell_jail::config::Config;
use shell_jail::Sandbox;

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("shell-jail")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_defaults() {
    let result = parse_args_from(args(&[])).unwrap();

    assert!(result.root.is_none());
    assert!(result.session.is_none());
    assert!(result.config.is_none());
    assert!(result.timeout.is_none());
    assert!(!result.unconfined);
    assert!(result.commands.is_empty());
}

#[test]
fn test_cli_full_options() {
    let result = parse_args_from(args(&[
        "-r",
        "/srv/workspace",
        "-s",
        "agent-7",
        "-t",
        "30",
        "-l",
        "debug",
        "--unconfined",
        "cd src",
        "make",
    ]))
    .unwrap();

    assert_eq!(result.root, Some(PathBuf::from("/srv/workspace")));
    assert_eq!(result.session.as_deref(), Some("agent-7"));
    assert_eq!(result.timeout, Some(Duration::from_secs(30)));
    assert_eq!(result.log_level, Some("debug".to_string()));
    assert!(result.unconfined);
    assert_eq!(result.commands, ["cd src", "make"]);
}

#[test]
fn test_cli_config_file() {
    let result = parse_args_from(args(&["-c", "/etc/shell-jail.json"])).unwrap();

    assert_eq!(result.config, Some(PathBuf::from("/etc/shell-jail.json")));
}

#[test]
fn test_cli_invalid_timeout() {
    let result = parse_args_from(args(&["-t", "not-a-number"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_missing_value() {
    let result = parse_args_from(args(&["--root"]));
    assert!(result.is_err());
}

// ============================================================================
// Configuration Loading Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let json = r#"{
        "jail": {
            "sandbox": "bubblewrap",
            "bwrap_path": "/usr/bin/bwrap",
            "interpreter": "/bin/bash",
            "ro_binds": ["/usr"],
            "optional_ro_binds": [],
            "share_net": false,
            "env": { "LANG": "C.UTF-8" }
        },
        "session": {
            "default_timeout_secs": 45,
            "launch_timeout_secs": 5,
            "dispose_grace_ms": 200
        },
        "logging": {
            "level": "debug"
        }
    }"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.jail.bwrap_path, PathBuf::from("/usr/bin/bwrap"));
    assert_eq!(config.jail.interpreter, PathBuf::from("/bin/bash"));
    assert_eq!(config.jail.ro_binds, [PathBuf::from("/usr")]);
    assert!(config.jail.optional_ro_binds.is_empty());
    assert!(!config.jail.share_net);
    assert_eq!(config.session.default_timeout_secs, Some(45.0));
    assert_eq!(config.session.launch_timeout_secs, 5);
    assert_eq!(config.session.dispose_grace_ms, 200);
    assert_eq!(config.log_filter(), Some("debug"));
}

#[test]
fn test_config_priority_cli_over_file() {
    let json = r#"{
        "jail": { "sandbox": "bubblewrap" },
        "session": { "default_timeout_secs": 120 }
    }"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let args = Args {
        config: Some(file.path().to_path_buf()),
        timeout: Some(Duration::from_secs(10)),
        unconfined: true,
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();

    // CLI values should win
    assert_eq!(config.session.default_timeout_secs, Some(10.0));
    assert_eq!(config.jail.sandbox, "unconfined");
}

#[test]
fn test_sub_second_timeout_from_cli() {
    let args = parse_args_from(args(&["--timeout", "0.5", "--unconfined"])).unwrap();
    let config = Config::load(&args).unwrap();

    assert_eq!(
        config.to_session_options().default_timeout,
        Some(Duration::from_millis(500))
    );
}

#[test]
fn test_config_missing_file_is_error() {
    let args = Args {
        config: Some(PathBuf::from("/nonexistent/shell-jail.json")),
        ..Args::default()
    };

    assert!(Config::load(&args).is_err());
}

#[test]
fn test_config_to_runtime_types() {
    let args = Args {
        unconfined: true,
        timeout: Some(Duration::from_secs(3)),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    let jail = config.to_jail_config().unwrap();
    let options = config.to_session_options();

    assert_eq!(jail.sandbox, Sandbox::Unconfined);
    assert_eq!(options.default_timeout, Some(Duration::from_secs(3)));
}

// ============================================================================
// Configuration Serialization Tests
// ============================================================================

#[test]
fn test_config_roundtrip() {
    let original = Config::default();
    let json = serde_json::to_string(&original).unwrap();
    let loaded: Config = serde_json::from_str(&json).unwrap();

    assert_eq!(original.jail.sandbox, loaded.jail.sandbox);
    assert_eq!(original.jail.ro_binds, loaded.jail.ro_binds);
    assert_eq!(
        original.session.dispose_grace_ms,
        loaded.session.dispose_grace_ms
    );
}

#[test]
fn test_config_partial_deserialization() {
    // Only specify some fields, others should use defaults
    let json = r#"{"session": {"dispose_grace_ms": 0}}"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.session.dispose_grace_ms, 0);
    assert_eq!(config.session.launch_timeout_secs, 10); // Default
    assert_eq!(config.jail.sandbox, "bubblewrap"); // Default
}
