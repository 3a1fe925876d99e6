//! Isolated interpreter launch.
//!
//! A [`JailConfig`] describes how the interpreter process is confined. The
//! launcher establishes the jail once, at spawn time; commands sent later
//! are never inspected or rewritten.

mod launcher;
mod stream;

pub use launcher::{bubblewrap_args, launch, locate_program, LaunchedProcess};
pub use stream::{StreamEvent, StreamPump};

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default interpreter, as seen from inside the jail.
pub const DEFAULT_INTERPRETER: &str = "/bin/sh";

/// How the interpreter process is confined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sandbox {
    /// Run under bubblewrap with the workspace root bound at `/`.
    Bubblewrap(BubblewrapOptions),
    /// Run the interpreter directly in the workspace root, without any
    /// isolation. Only ever used when explicitly configured.
    Unconfined,
}

impl Sandbox {
    /// Short name used in logs and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Sandbox::Bubblewrap(_) => "bubblewrap",
            Sandbox::Unconfined => "unconfined",
        }
    }
}

/// Bubblewrap-specific launch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BubblewrapOptions {
    /// Program name or path of the bubblewrap binary.
    pub program: PathBuf,
    /// Host paths bound read-only at the same location; must exist.
    pub ro_binds: Vec<PathBuf>,
    /// Host paths bound read-only if they exist.
    pub optional_ro_binds: Vec<PathBuf>,
    /// Keep the host network namespace.
    pub share_net: bool,
}

impl Default for BubblewrapOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("bwrap"),
            ro_binds: vec![PathBuf::from("/bin"), PathBuf::from("/usr")],
            optional_ro_binds: vec![
                PathBuf::from("/lib"),
                PathBuf::from("/lib64"),
                PathBuf::from("/etc"),
            ],
            share_net: true,
        }
    }
}

/// Launch configuration for a session's interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailConfig {
    /// Isolation mechanism.
    pub sandbox: Sandbox,
    /// Interpreter to run; it must read commands from stdin.
    pub interpreter: PathBuf,
    /// The complete environment of the interpreter. Nothing is inherited
    /// from the host.
    pub env: BTreeMap<String, String>,
}

impl JailConfig {
    /// Bubblewrap jail with default binds.
    pub fn bubblewrap() -> Self {
        Self::with_sandbox(Sandbox::Bubblewrap(BubblewrapOptions::default()))
    }

    /// No isolation at all.
    pub fn unconfined() -> Self {
        Self::with_sandbox(Sandbox::Unconfined)
    }

    fn with_sandbox(sandbox: Sandbox) -> Self {
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), "/".to_string());
        env.insert("PATH".to_string(), "/bin:/usr/bin".to_string());
        Self {
            sandbox,
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            env,
        }
    }

    /// Set an environment variable for the interpreter.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Use a different interpreter.
    pub fn interpreter(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter = path.into();
        self
    }
}

impl Default for JailConfig {
    fn default() -> Self {
        Self::bubblewrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_bubblewrap() {
        let config = JailConfig::default();
        assert_eq!(config.sandbox.name(), "bubblewrap");
        assert_eq!(config.interpreter, PathBuf::from("/bin/sh"));
        assert_eq!(config.env.get("HOME").map(String::as_str), Some("/"));
    }

    #[test]
    fn test_unconfined() {
        let config = JailConfig::unconfined();
        assert_eq!(config.sandbox, Sandbox::Unconfined);
        assert_eq!(config.sandbox.name(), "unconfined");
    }

    #[test]
    fn test_builder_methods() {
        let config = JailConfig::unconfined()
            .env("LANG", "C")
            .interpreter("/usr/bin/dash");
        assert_eq!(config.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(config.interpreter, PathBuf::from("/usr/bin/dash"));
    }

    #[test]
    fn test_bubblewrap_defaults() {
        let opts = BubblewrapOptions::default();
        assert_eq!(opts.program, PathBuf::from("bwrap"));
        assert!(opts.ro_binds.contains(&PathBuf::from("/usr")));
        assert!(opts.optional_ro_binds.contains(&PathBuf::from("/etc")));
        assert!(opts.share_net);
    }
}
