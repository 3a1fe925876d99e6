//! Command result types.

use std::borrow::Cow;
use std::time::Duration;

/// Result of running one command in a shell session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit status reported by the interpreter.
    pub exit_code: i32,
    /// Bytes the command wrote to standard output.
    pub stdout: Vec<u8>,
    /// Bytes the command wrote to standard error.
    pub stderr: Vec<u8>,
    /// Wall time from write to decoded completion.
    pub duration: Duration,
}

impl CommandResult {
    /// Create a new command result.
    pub fn new(exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            duration: Duration::ZERO,
        }
    }

    /// Result for a command that had nothing to run.
    pub fn empty() -> Self {
        Self::new(0, Vec::new(), Vec::new())
    }

    /// Set the measured duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Check if command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output decoded as UTF-8, lossily.
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error decoded as UTF-8, lossily.
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

impl Default for CommandResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// Which interpreter stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSource {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputSource {
    /// Short lowercase name, used for thread names and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSource::Stdout => "stdout",
            OutputSource::Stderr => "stderr",
        }
    }
}
