//! Async facade over the session registry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::offload::{Offload, TokioBlocking};
use super::CommandResult;
use crate::jail::JailConfig;
use crate::session::{SessionHandle, SessionId, SessionOptions, SessionRegistry};
use crate::Result;

/// Async entry point for callers living on a tokio runtime.
///
/// Every blocking session call is handed to `O`; ordering between commands
/// of one session still comes only from the session's execution lock.
pub struct ShellService<O: Offload = TokioBlocking> {
    registry: Arc<SessionRegistry>,
    offload: O,
}

impl ShellService<TokioBlocking> {
    /// Create a service with a fresh registry on tokio's blocking pool.
    pub fn new(options: SessionOptions) -> Self {
        Self::with_registry(Arc::new(SessionRegistry::with_options(options)))
    }

    /// Wrap an existing registry.
    pub fn with_registry(registry: Arc<SessionRegistry>) -> Self {
        Self::with_offload(registry, TokioBlocking)
    }
}

impl<O: Offload> ShellService<O> {
    /// Wrap `registry`, running blocking work through `offload`.
    pub fn with_offload(registry: Arc<SessionRegistry>, offload: O) -> Self {
        Self { registry, offload }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// See [`SessionRegistry::create_or_get_session`].
    pub async fn create_or_get_session(
        &self,
        id: SessionId,
        root: impl Into<PathBuf>,
        jail: JailConfig,
    ) -> Result<SessionHandle> {
        let registry = Arc::clone(&self.registry);
        let root = root.into();
        self.offload
            .offload(move || registry.create_or_get_session(&id, &root, &jail))
            .await
    }

    /// See [`SessionRegistry::run_command`].
    pub async fn run_command(
        &self,
        id: &str,
        command: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        let registry = Arc::clone(&self.registry);
        let id = id.to_owned();
        let command = command.into();
        debug!(session = %id, "dispatching command");
        self.offload
            .offload(move || registry.run_command(&id, &command, timeout))
            .await
    }

    /// See [`SessionRegistry::dispose_session`].
    pub async fn dispose_session(&self, id: &str) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let id = id.to_owned();
        self.offload
            .offload(move || registry.dispose_session(&id))
            .await
    }

    /// See [`SessionRegistry::list_sessions`]. Does not block on launches.
    pub fn list_sessions(&self) -> Result<Vec<SessionId>> {
        self.registry.list_sessions()
    }

    /// Dispose every session. Returns the number drained.
    pub async fn shutdown(&self) -> Result<usize> {
        let registry = Arc::clone(&self.registry);
        self.offload.offload(move || Ok(registry.shutdown())).await
    }
}

impl<O: Offload + Clone> Clone for ShellService<O> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            offload: self.offload.clone(),
        }
    }
}
