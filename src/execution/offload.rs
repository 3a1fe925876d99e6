//! Moving blocking session calls off the async executor.

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tracing::error;

use crate::error::ShellJailError;
use crate::Result;

/// Runs a blocking job on some worker and resolves with its result.
pub trait Offload: Send + Sync + 'static {
    /// Start `job` on a worker.
    ///
    /// A worker that panics or goes away resolves to
    /// [`ShellJailError::Worker`].
    fn offload<F, T>(&self, job: F) -> BoxFuture<'static, Result<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static;
}

/// Tokio's blocking thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioBlocking;

impl Offload for TokioBlocking {
    fn offload<F, T>(&self, job: F) -> BoxFuture<'static, Result<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(job)
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "blocking task failed");
                    Err(ShellJailError::Worker(e.to_string()))
                }
            })
            .boxed()
    }
}

/// One OS thread per job.
///
/// Useful when a command may hold its worker for longer than the blocking
/// pool should be tied up.
#[derive(Debug, Clone, Default)]
pub struct DedicatedThread {
    name: Option<String>,
}

impl DedicatedThread {
    /// Name worker threads `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl Offload for DedicatedThread {
    fn offload<F, T>(&self, job: F) -> BoxFuture<'static, Result<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut builder = std::thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }

        let spawned = builder.spawn(move || {
            let _ = tx.send(job());
        });

        match spawned {
            Ok(_) => rx
                .map(|received| {
                    received.unwrap_or_else(|_| {
                        Err(ShellJailError::Worker("worker thread exited early".into()))
                    })
                })
                .boxed(),
            Err(e) => futures_util::future::ready(Err(ShellJailError::Worker(format!(
                "failed to spawn worker thread: {e}"
            ))))
            .boxed(),
        }
    }
}
