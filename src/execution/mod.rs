//! Command results and async execution.
//!
//! Sessions are blocking by nature: a run holds its caller until the
//! interpreter reports completion. [`ShellService`] wraps a
//! [`SessionRegistry`](crate::session::SessionRegistry) so async callers can
//! drive sessions without stalling the runtime, using an [`Offload`]
//! strategy to pick where the blocking work happens.
//!
//! # Example
//!
//! ```no_run
//! use shell_jail::execution::ShellService;
//! use shell_jail::jail::JailConfig;
//! use shell_jail::session::{SessionId, SessionOptions};
//!
//! # async fn demo() -> shell_jail::Result<()> {
//! let service = ShellService::new(SessionOptions::default());
//! let id = SessionId::new("build")?;
//! service
//!     .create_or_get_session(id, "/srv/workspace", JailConfig::default())
//!     .await?;
//!
//! let result = service.run_command("build", "ls", None).await?;
//! println!("{}", result.stdout_text());
//! # Ok(())
//! # }
//! ```

mod offload;
mod result;
mod service;

pub use offload::{DedicatedThread, Offload, TokioBlocking};
pub use result::{CommandResult, OutputSource};
pub use service::ShellService;
