//! Configuration management for shell-jail.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::jail::{BubblewrapOptions, JailConfig, Sandbox, DEFAULT_INTERPRETER};
use crate::session::{SessionOptions, DEFAULT_DISPOSE_GRACE, DEFAULT_LAUNCH_TIMEOUT};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interpreter confinement.
    pub jail: JailSection,
    /// Session timing.
    pub session: SessionSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Jail configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JailSection {
    /// `bubblewrap` or `unconfined`.
    pub sandbox: String,
    /// Bubblewrap binary name or path.
    pub bwrap_path: PathBuf,
    /// Interpreter path inside the jail.
    pub interpreter: PathBuf,
    /// Paths bound read-only; must exist.
    pub ro_binds: Vec<PathBuf>,
    /// Paths bound read-only when present.
    pub optional_ro_binds: Vec<PathBuf>,
    /// Keep host networking.
    pub share_net: bool,
    /// Extra interpreter environment, on top of `HOME` and `PATH`.
    pub env: BTreeMap<String, String>,
}

impl Default for JailSection {
    fn default() -> Self {
        let bwrap = BubblewrapOptions::default();
        Self {
            sandbox: "bubblewrap".to_string(),
            bwrap_path: bwrap.program,
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            ro_binds: bwrap.ro_binds,
            optional_ro_binds: bwrap.optional_ro_binds,
            share_net: bwrap.share_net,
            env: BTreeMap::new(),
        }
    }
}

/// Session configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Per-command timeout in seconds (fractions allowed) when none is
    /// given; unset waits forever.
    pub default_timeout_secs: Option<f64>,
    /// Limit for the post-launch readiness probe.
    pub launch_timeout_secs: u64,
    /// Grace period before a disposed interpreter is killed.
    pub dispose_grace_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: None,
            launch_timeout_secs: DEFAULT_LAUNCH_TIMEOUT.as_secs(),
            dispose_grace_ms: DEFAULT_DISPOSE_GRACE.as_millis() as u64,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Filter directive (`info`, `shell_jail=debug`, ...). Unset uses the
    /// built-in default.
    pub level: Option<String>,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(sandbox) = var("SHELL_JAIL_SANDBOX") {
            self.jail.sandbox = sandbox;
        }

        if let Some(path) = var("SHELL_JAIL_BWRAP") {
            if !path.is_empty() {
                self.jail.bwrap_path = PathBuf::from(path);
            }
        }

        if let Some(timeout) = var("SHELL_JAIL_TIMEOUT") {
            if let Some(secs) = parse_timeout_secs(&timeout) {
                self.session.default_timeout_secs = Some(secs);
            }
        }

        if let Some(level) = var("SHELL_JAIL_LOG_LEVEL") {
            self.logging.level = Some(level);
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = Some(level);
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if args.unconfined {
            self.jail.sandbox = "unconfined".to_string();
        }

        if let Some(timeout) = args.timeout {
            self.session.default_timeout_secs = Some(timeout.as_secs_f64());
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = Some(level.clone());
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Build the interpreter launch configuration.
    pub fn to_jail_config(&self) -> Result<JailConfig, ConfigError> {
        let base = match self.jail.sandbox.as_str() {
            "bubblewrap" | "bwrap" => JailConfig {
                sandbox: Sandbox::Bubblewrap(BubblewrapOptions {
                    program: self.jail.bwrap_path.clone(),
                    ro_binds: self.jail.ro_binds.clone(),
                    optional_ro_binds: self.jail.optional_ro_binds.clone(),
                    share_net: self.jail.share_net,
                }),
                ..JailConfig::bubblewrap()
            },
            "unconfined" | "none" => JailConfig::unconfined(),
            other => return Err(ConfigError::InvalidSandbox(other.to_string())),
        };

        Ok(self
            .jail
            .env
            .iter()
            .fold(base.interpreter(&self.jail.interpreter), |jail, (k, v)| {
                jail.env(k, v)
            }))
    }

    /// Build the session timing options.
    pub fn to_session_options(&self) -> SessionOptions {
        SessionOptions::default()
            .launch_timeout(Duration::from_secs(self.session.launch_timeout_secs))
            .dispose_grace(Duration::from_millis(self.session.dispose_grace_ms))
            .default_timeout(
                self.session
                    .default_timeout_secs
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            )
    }

    /// Get the log filter directive, if one was configured.
    pub fn log_filter(&self) -> Option<&str> {
        self.logging.level.as_deref()
    }
}

fn parse_timeout_secs(value: &str) -> Option<f64> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok().map(|_| secs)
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Unknown sandbox name.
    InvalidSandbox(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidSandbox(name) => {
                write!(f, "unknown sandbox '{}' (expected bubblewrap or unconfined)", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.jail.sandbox, "bubblewrap");
        assert_eq!(config.jail.bwrap_path, PathBuf::from("bwrap"));
        assert!(config.jail.share_net);
        assert_eq!(config.session.default_timeout_secs, None);
        assert_eq!(config.log_filter(), None);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "jail": {
                "sandbox": "bubblewrap",
                "bwrap_path": "/usr/local/bin/bwrap",
                "share_net": false,
                "env": { "LANG": "C.UTF-8" }
            },
            "session": {
                "default_timeout_secs": 30,
                "dispose_grace_ms": 100
            },
            "logging": { "level": "debug" }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.jail.bwrap_path, PathBuf::from("/usr/local/bin/bwrap"));
        assert!(!config.jail.share_net);
        assert_eq!(config.session.default_timeout_secs, Some(30.0));
        assert_eq!(config.session.launch_timeout_secs, 10); // Default
        assert_eq!(config.log_filter(), Some("debug"));
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_config_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/shell-jail.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = [
            ("SHELL_JAIL_SANDBOX", "unconfined"),
            ("SHELL_JAIL_BWRAP", "/opt/bwrap"),
            ("SHELL_JAIL_TIMEOUT", "15"),
            ("RUST_LOG", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.jail.sandbox, "unconfined");
        assert_eq!(config.jail.bwrap_path, PathBuf::from("/opt/bwrap"));
        assert_eq!(config.session.default_timeout_secs, Some(15.0));
        assert_eq!(config.log_filter(), Some("trace"));
    }

    #[test]
    fn test_env_log_level_precedence() {
        let mut config = Config::default();
        config.apply_env_from(|key| match key {
            "SHELL_JAIL_LOG_LEVEL" => Some("warn".to_string()),
            "RUST_LOG" => Some("trace".to_string()),
            _ => None,
        });
        assert_eq!(config.log_filter(), Some("warn"));
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.session.default_timeout_secs = Some(60.0);

        let args = Args {
            unconfined: true,
            timeout: Some(Duration::from_secs(5)),
            log_level: Some("debug".to_string()),
            ..Args::default()
        };
        config.apply_args(&args);

        assert_eq!(config.jail.sandbox, "unconfined");
        assert_eq!(config.session.default_timeout_secs, Some(5.0));
        assert_eq!(config.log_filter(), Some("debug"));
    }

    #[test]
    fn test_fractional_timeout_survives_conversion() {
        let args = crate::cli::parse_args_from(
            ["shell-jail", "-t", "0.5"].into_iter().map(std::ffi::OsString::from),
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_args(&args);

        assert_eq!(config.session.default_timeout_secs, Some(0.5));
        assert_eq!(
            config.to_session_options().default_timeout,
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_env_timeout_validation() {
        let mut config = Config::default();
        config.apply_env_from(|key| (key == "SHELL_JAIL_TIMEOUT").then(|| "2.25".to_string()));
        assert_eq!(
            config.to_session_options().default_timeout,
            Some(Duration::from_millis(2250))
        );

        for bad in ["-1", "soon", "NaN"] {
            let mut config = Config::default();
            config.apply_env_from(|key| (key == "SHELL_JAIL_TIMEOUT").then(|| bad.to_string()));
            assert_eq!(config.session.default_timeout_secs, None, "value {bad:?}");
        }
    }

    #[test]
    fn test_to_jail_config() {
        let mut config = Config::default();
        config.jail.bwrap_path = PathBuf::from("/opt/bwrap");
        config.jail.share_net = false;
        config.jail.env.insert("LANG".into(), "C".into());

        let jail = config.to_jail_config().unwrap();
        match &jail.sandbox {
            Sandbox::Bubblewrap(opts) => {
                assert_eq!(opts.program, PathBuf::from("/opt/bwrap"));
                assert!(!opts.share_net);
            }
            other => panic!("unexpected sandbox: {:?}", other),
        }
        assert_eq!(jail.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(jail.env.get("PATH").map(String::as_str), Some("/bin:/usr/bin"));
    }

    #[test]
    fn test_to_jail_config_unconfined() {
        let mut config = Config::default();
        config.jail.sandbox = "unconfined".into();
        assert_eq!(config.to_jail_config().unwrap().sandbox, Sandbox::Unconfined);
    }

    #[test]
    fn test_invalid_sandbox() {
        let mut config = Config::default();
        config.jail.sandbox = "docker".into();
        assert!(matches!(
            config.to_jail_config(),
            Err(ConfigError::InvalidSandbox(_))
        ));
    }

    #[test]
    fn test_to_session_options() {
        let mut config = Config::default();
        config.session.default_timeout_secs = Some(20.0);
        config.session.dispose_grace_ms = 50;

        let options = config.to_session_options();
        assert_eq!(options.default_timeout, Some(Duration::from_secs(20)));
        assert_eq!(options.dispose_grace, Duration::from_millis(50));
        assert_eq!(options.launch_timeout, DEFAULT_LAUNCH_TIMEOUT);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"sandbox\""));
        assert!(json.contains("\"dispose_grace_ms\""));
    }
}
