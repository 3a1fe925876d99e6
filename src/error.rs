//! Error types for shell-jail.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for shell-jail operations.
#[derive(Error, Debug)]
pub enum ShellJailError {
    /// The sandbox wrapper or the kernel features it needs are missing.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// The session's interpreter is gone; recreate the session to continue.
    #[error("session is dead: {0}")]
    SessionDead(String),

    /// A command did not complete within its allotted time.
    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// The interpreter exited while a command was in flight.
    #[error("shell process terminated{}", format_detail(.detail))]
    ProcessTerminated {
        /// Whatever the process wrote to stderr before it went away.
        detail: String,
    },

    /// Session with the given ID was not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session identifiers must be non-empty.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// Workspace root does not exist or is not a directory.
    #[error("invalid workspace root: {}", .0.display())]
    InvalidWorkspace(PathBuf),

    /// A live session already exists for the ID under another root.
    #[error("session {id} is bound to {}, not {}", .existing.display(), .requested.display())]
    WorkspaceMismatch {
        id: String,
        existing: PathBuf,
        requested: PathBuf,
    },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: crate::session::SessionState,
        to: crate::session::SessionState,
    },

    /// The completion marker could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// An offloaded call never produced a result.
    #[error("worker failed: {0}")]
    Worker(String),
}

fn format_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

impl ShellJailError {
    /// Whether this error leaves the session unusable.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::SessionDead(_)
                | Self::CommandTimeout(_)
                | Self::ProcessTerminated { .. }
                | Self::Protocol(_)
        )
    }
}

/// Convenience Result type for shell-jail operations.
pub type Result<T> = std::result::Result<T, ShellJailError>;
