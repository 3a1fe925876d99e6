//! # shell-jail
//!
//! Persistent, sandboxed shell sessions for agents.
//!
//! Each session is one long-lived interpreter confined to a workspace root.
//! Commands are written to its stdin and delimited with per-command
//! sentinel markers, so shell state (working directory, exported
//! variables, functions) survives from one command to the next while each
//! command still gets its own exit code, stdout and stderr.
//!
//! ## Features
//!
//! - **Jailed interpreter**: bubblewrap binds the workspace root at `/`
//! - **Persistent state**: `cd` and `export` carry over between commands
//! - **Separate streams**: stdout and stderr are captured independently
//! - **Async facade**: drive sessions from tokio without blocking it
//!
//! ## Quick Start
//!
//! ```no_run
//! use shell_jail::{JailConfig, SessionId, SessionOptions, SessionRegistry};
//!
//! fn main() -> shell_jail::Result<()> {
//!     shell_jail::logging::try_init().ok();
//!
//!     let registry = SessionRegistry::with_options(SessionOptions::default());
//!     let id = SessionId::new("agent-1")?;
//!     registry.create_or_get_session(&id, "/srv/workspace", &JailConfig::default())?;
//!
//!     registry.run_command("agent-1", "cd src", None)?;
//!     let result = registry.run_command("agent-1", "pwd", None)?;
//!     assert_eq!(result.stdout_text(), "/src\n");
//!
//!     registry.dispose_session("agent-1")?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod jail;
pub mod logging;
pub mod protocol;
pub mod session;

// Re-export commonly used types
pub use error::{Result, ShellJailError};
pub use execution::{CommandResult, OutputSource, ShellService};
pub use jail::{JailConfig, Sandbox};
pub use session::{
    SessionHandle, SessionId, SessionOptions, SessionRegistry, SessionState, ShellSession,
};
