//! Identifier-keyed ownership of shell sessions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{SessionId, SessionOptions, ShellSession};
use crate::error::ShellJailError;
use crate::execution::CommandResult;
use crate::jail::JailConfig;
use crate::Result;

/// Shared handle to a live session.
pub type SessionHandle = Arc<ShellSession>;

/// Everything the registry keeps for one identifier.
///
/// The map lock is only held long enough to find or insert a slot.
/// `creating` serializes launches for the identifier, so a slow launch
/// never blocks lookups of this or any other identifier; `state` is only
/// ever locked briefly.
#[derive(Default)]
struct Slot {
    creating: Mutex<()>,
    state: RwLock<SlotState>,
}

#[derive(Default)]
struct SlotState {
    session: Option<SessionHandle>,
    /// Set once the slot has been removed from the map; a caller that
    /// still holds it must look up a fresh slot.
    retired: bool,
}

impl Slot {
    fn session(&self) -> Result<Option<SessionHandle>> {
        let state = self
            .state
            .read()
            .map_err(|_| ShellJailError::LockPoisoned)?;
        Ok(state.session.clone())
    }

    /// Mark retired and hand back whatever session was stored.
    fn retire(&self) -> Option<SessionHandle> {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.retired = true;
        state.session.take()
    }
}

/// Owner of every session of a service instance.
///
/// Constructed at startup and passed to whoever needs it; dropping the
/// registry disposes every session it still holds.
pub struct SessionRegistry {
    slots: RwLock<HashMap<SessionId, Arc<Slot>>>,
    options: SessionOptions,
}

impl SessionRegistry {
    /// Create an empty registry with default session options.
    pub fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    /// Create an empty registry whose sessions use `options`.
    pub fn with_options(options: SessionOptions) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            options,
        }
    }

    fn slot(&self, id: &SessionId) -> Result<Arc<Slot>> {
        {
            let slots = self
                .slots
                .read()
                .map_err(|_| ShellJailError::LockPoisoned)?;
            if let Some(slot) = slots.get(id) {
                return Ok(Arc::clone(slot));
            }
        }

        let mut slots = self
            .slots
            .write()
            .map_err(|_| ShellJailError::LockPoisoned)?;
        Ok(Arc::clone(slots.entry(id.clone()).or_default()))
    }

    fn lookup(&self, id: &str) -> Result<Option<Arc<Slot>>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| ShellJailError::LockPoisoned)?;
        Ok(slots.get(id).cloned())
    }

    /// Remove `slot` from the map if it is still the one registered as `id`.
    fn forget(&self, id: &SessionId, slot: &Arc<Slot>) {
        let mut slots = match self.slots.write() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slots.get(id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(id);
        }
    }

    /// Return the live session for `id`, launching one if needed.
    ///
    /// Concurrent calls for the same new identifier launch exactly one
    /// interpreter; the others wait and receive the same handle. A dead
    /// session under `id` is replaced. A failed launch leaves nothing
    /// registered under `id`.
    ///
    /// # Errors
    ///
    /// `WorkspaceMismatch` if a live session for `id` uses another root;
    /// otherwise whatever [`ShellSession::start`] reports.
    pub fn create_or_get_session(
        &self,
        id: &SessionId,
        root: impl AsRef<Path>,
        jail: &JailConfig,
    ) -> Result<SessionHandle> {
        let root = root.as_ref();
        loop {
            let slot = self.slot(id)?;
            let _creating = slot
                .creating
                .lock()
                .map_err(|_| ShellJailError::LockPoisoned)?;

            let existing = {
                let state = slot
                    .state
                    .read()
                    .map_err(|_| ShellJailError::LockPoisoned)?;
                if state.retired {
                    continue;
                }
                state.session.clone()
            };

            if let Some(existing) = existing {
                if existing.is_alive() {
                    let requested = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
                    if existing.root() != requested {
                        return Err(ShellJailError::WorkspaceMismatch {
                            id: id.to_string(),
                            existing: existing.root().to_path_buf(),
                            requested,
                        });
                    }
                    return Ok(existing);
                }
                debug!(session = %id, "replacing dead session");
            }

            let session = match ShellSession::start(id.clone(), root, jail, self.options) {
                Ok(session) => Arc::new(session),
                Err(e) => {
                    self.forget(id, &slot);
                    slot.retire();
                    return Err(e);
                }
            };

            let mut state = slot
                .state
                .write()
                .map_err(|_| ShellJailError::LockPoisoned)?;
            if state.retired {
                // Disposed while launching; start over in a fresh slot.
                drop(state);
                let _ = session.dispose();
                continue;
            }
            state.session = Some(Arc::clone(&session));
            info!(session = %id, root = %session.root().display(), "session created");
            return Ok(session);
        }
    }

    /// Look up the session for `id`, dead or alive.
    pub fn get(&self, id: &str) -> Result<SessionHandle> {
        let session = match self.lookup(id)? {
            Some(slot) => slot.session()?,
            None => None,
        };
        session.ok_or_else(|| ShellJailError::SessionNotFound(id.to_string()))
    }

    /// Run `command` in the session registered as `id`.
    ///
    /// Falls back to the registry's default timeout. Dead sessions are not
    /// recreated.
    pub fn run_command(
        &self,
        id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        let result = self.get(id)?.run(command, timeout);
        if let Err(e) = &result {
            if e.is_fatal_to_session() {
                info!(session = %id, error = %e, "session lost, create it again to continue");
            }
        }
        result
    }

    /// Dispose and forget the session for `id`; no-op if unknown.
    pub fn dispose_session(&self, id: &str) -> Result<()> {
        let slot = {
            let mut slots = self
                .slots
                .write()
                .map_err(|_| ShellJailError::LockPoisoned)?;
            slots.remove(id)
        };

        match slot.and_then(|slot| slot.retire()) {
            Some(session) => session.dispose(),
            None => Ok(()),
        }
    }

    /// Snapshot of identifiers with a live session, sorted.
    ///
    /// Identifiers whose first launch is still in progress are not
    /// included.
    pub fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let slots: Vec<(SessionId, Arc<Slot>)> = {
            let slots = self
                .slots
                .read()
                .map_err(|_| ShellJailError::LockPoisoned)?;
            slots
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut ids = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            if slot.session()?.is_some_and(|session| session.is_alive()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Number of registered identifiers, live or not.
    pub fn count(&self) -> usize {
        self.slots.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Dispose every session and empty the registry.
    ///
    /// Returns the number of identifiers drained.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(SessionId, Arc<Slot>)> = match self.slots.write() {
            Ok(mut slots) => slots.drain().collect(),
            Err(poisoned) => poisoned.into_inner().drain().collect(),
        };

        let count = drained.len();
        for (id, slot) in drained {
            if let Some(session) = slot.retire() {
                if let Err(e) = session.dispose() {
                    warn!(session = %id, error = %e, "failed to dispose session during shutdown");
                }
            }
        }

        if count > 0 {
            info!(sessions = count, "registry shut down");
        }
        count
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::thread;

    fn registry() -> SessionRegistry {
        SessionRegistry::with_options(
            SessionOptions::default().dispose_grace(Duration::from_millis(100)),
        )
    }

    fn id(value: &str) -> SessionId {
        SessionId::new(value).unwrap()
    }

    #[test]
    fn test_get_or_create_reuses_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let jail = JailConfig::unconfined();

        let first = registry.create_or_get_session(&id("shared"), dir.path(), &jail).unwrap();
        assert!(first.run("mkdir nested && cd nested", None).unwrap().success());

        let second = registry.create_or_get_session(&id("shared"), dir.path(), &jail).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let pwd = registry.run_command("shared", "pwd", None).unwrap();
        assert!(pwd.stdout_text().trim_end().ends_with("/nested"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_workspace_mismatch() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let registry = registry();
        let jail = JailConfig::unconfined();

        registry.create_or_get_session(&id("s"), a.path(), &jail).unwrap();
        let err = registry.create_or_get_session(&id("s"), b.path(), &jail).unwrap_err();
        assert!(matches!(err, ShellJailError::WorkspaceMismatch { .. }));
    }

    #[test]
    fn test_concurrent_creation_launches_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry());
        let root = dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let root = root.clone();
                thread::spawn(move || {
                    registry
                        .create_or_get_session(&id("race"), &root, &JailConfig::unconfined())
                        .unwrap()
                })
            })
            .collect();

        let sessions: Vec<SessionHandle> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let first = &sessions[0];
        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(first, session));
            assert_eq!(session.pid(), first.pid());
        }
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_unknown_session() {
        let registry = registry();
        let err = registry.run_command("missing", "true", None).unwrap_err();
        assert!(matches!(err, ShellJailError::SessionNotFound(_)));
        assert!(registry.get("missing").is_err());
    }

    #[test]
    fn test_dispose_removes_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let session = registry
            .create_or_get_session(&id("gone"), dir.path(), &JailConfig::unconfined())
            .unwrap();

        registry.dispose_session("gone").unwrap();
        assert!(!session.is_alive());
        assert_eq!(registry.count(), 0);
        assert!(registry.list_sessions().unwrap().is_empty());

        // Unknown identifiers are a no-op.
        registry.dispose_session("gone").unwrap();
    }

    #[test]
    fn test_dead_session_reports_dead_then_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let jail = JailConfig::unconfined();
        let first = registry.create_or_get_session(&id("s"), dir.path(), &jail).unwrap();

        let err = registry
            .run_command("s", "sleep 5", Some(Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, ShellJailError::CommandTimeout(_)));

        let err = registry.run_command("s", "true", None).unwrap_err();
        assert!(matches!(err, ShellJailError::SessionDead(_)));
        assert!(registry.list_sessions().unwrap().is_empty());

        let second = registry.create_or_get_session(&id("s"), dir.path(), &jail).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(registry.run_command("s", "true", None).unwrap().success());
    }

    #[test]
    fn test_list_is_sorted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let jail = JailConfig::unconfined();

        for name in ["charlie", "alpha", "bravo"] {
            registry.create_or_get_session(&id(name), dir.path(), &jail).unwrap();
        }

        let listed = registry.list_sessions().unwrap();
        let names: Vec<&str> = listed.iter().map(SessionId::as_str).collect();
        assert_eq!(names, ["alpha", "bravo", "charlie"]);

        registry.dispose_session("bravo").unwrap();
        // The earlier snapshot is unaffected; a new one reflects the change.
        assert_eq!(listed.len(), 3);
        assert_eq!(registry.list_sessions().unwrap().len(), 2);
    }

    #[test]
    fn test_shutdown_disposes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let jail = JailConfig::unconfined();

        let a = registry.create_or_get_session(&id("a"), dir.path(), &jail).unwrap();
        let b = registry.create_or_get_session(&id("b"), dir.path(), &jail).unwrap();

        assert_eq!(registry.shutdown(), 2);
        assert!(!a.is_alive());
        assert!(!b.is_alive());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_failed_launch_is_not_registered_as_live() {
        let registry = registry();
        let err = registry
            .create_or_get_session(&id("bad"), "/nonexistent/root", &JailConfig::unconfined())
            .unwrap_err();
        assert!(matches!(err, ShellJailError::InvalidWorkspace(_)));
        assert!(registry.list_sessions().unwrap().is_empty());
        assert!(registry.get("bad").is_err());
    }

    #[test]
    fn test_failed_launches_leave_no_slots() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();

        for i in 0..5 {
            let name = format!("bad-{i}");
            assert!(registry
                .create_or_get_session(&id(&name), "/nonexistent/root", &JailConfig::unconfined())
                .is_err());
        }
        assert_eq!(registry.count(), 0);

        // The identifier is usable again after a failure.
        registry
            .create_or_get_session(&id("bad-0"), dir.path(), &JailConfig::unconfined())
            .unwrap();
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.list_sessions().unwrap(), [id("bad-0")]);
    }

    #[test]
    fn test_list_sees_sessions_under_load() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry());
        let jail = JailConfig::unconfined();
        registry.create_or_get_session(&id("a"), dir.path(), &jail).unwrap();

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let stop = Arc::clone(&stop);
                let root = dir.path().to_path_buf();
                thread::spawn(move || {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        match i {
                            0 => {
                                registry.run_command("a", "true", None).unwrap();
                            }
                            1 => {
                                let jail = JailConfig::unconfined();
                                registry.create_or_get_session(&id("a"), &root, &jail).unwrap();
                            }
                            _ => {
                                registry.get("a").unwrap();
                            }
                        }
                    }
                })
            })
            .collect();

        for _ in 0..2_000 {
            assert_eq!(registry.list_sessions().unwrap(), [id("a")]);
        }

        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
