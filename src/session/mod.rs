//! Persistent shell sessions.
//!
//! A [`ShellSession`] owns one jailed interpreter and runs commands in it
//! one at a time, so working directory and exported variables carry over
//! between calls. A [`SessionRegistry`] maps caller-chosen identifiers to
//! sessions.

mod id;
mod registry;
mod shell;
mod state;

pub use id::SessionId;
pub use registry::{SessionHandle, SessionRegistry};
pub use shell::{SessionOptions, ShellSession, DEFAULT_DISPOSE_GRACE, DEFAULT_LAUNCH_TIMEOUT};
pub use state::SessionState;
