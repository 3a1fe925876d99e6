//! A persistent interpreter behind one session identifier.
//!
//! The interpreter process is the only place session state lives: the
//! working directory, variables, functions and options all persist because
//! every command is fed to the same process. Nothing here tracks or caches
//! that state.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{SessionId, SessionState};
use crate::error::ShellJailError;
use crate::execution::{CommandResult, OutputSource};
use crate::jail::{self, JailConfig, StreamEvent};
use crate::protocol::{encode, Decoder, Sentinel};
use crate::Result;

/// How long a new interpreter gets to answer its first command.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a disposed interpreter gets to exit after stdin closes.
pub const DEFAULT_DISPOSE_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on a single wait for output, so liveness is rechecked.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Output still in flight when the process exits is read for this long.
const DRAIN_WINDOW: Duration = Duration::from_millis(250);

const REAP_POLL: Duration = Duration::from_millis(10);

/// Timing knobs shared by every session of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Limit for the readiness probe run right after launch.
    pub launch_timeout: Duration,
    /// Grace period between closing stdin and killing on dispose.
    pub dispose_grace: Duration,
    /// Timeout applied when a run does not specify one. `None` waits
    /// forever.
    pub default_timeout: Option<Duration>,
}

impl SessionOptions {
    /// Set the launch probe timeout.
    pub fn launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    /// Set the dispose grace period.
    pub fn dispose_grace(mut self, grace: Duration) -> Self {
        self.dispose_grace = grace;
        self
    }

    /// Set the default command timeout.
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            dispose_grace: DEFAULT_DISPOSE_GRACE,
            default_timeout: None,
        }
    }
}

/// Everything a running command needs exclusive access to. The mutex
/// around it is the session's execution lock.
struct Channel {
    stdin: Option<ChildStdin>,
    events: Receiver<StreamEvent>,
    sequence: u64,
}

/// One long-lived jailed interpreter.
///
/// Commands are serialized by an internal execution lock: concurrent
/// callers queue on it, and each receives the full result of exactly one
/// command. Any failure while a command is in flight (timeout, process
/// death, broken pipe, garbled markers) disposes the session, since the
/// interpreter's position in the byte stream is no longer known.
pub struct ShellSession {
    id: SessionId,
    root: PathBuf,
    pid: u32,
    options: SessionOptions,
    state: Mutex<SessionState>,
    channel: Mutex<Channel>,
    process: Mutex<Child>,
    commands_run: AtomicU64,
}

impl ShellSession {
    /// Launch an interpreter for `root` and wait until it answers.
    ///
    /// # Errors
    ///
    /// `InvalidWorkspace` if `root` is not an existing directory;
    /// `SandboxUnavailable` if the sandbox is missing, or the interpreter
    /// dies or stays silent during the readiness probe.
    pub fn start(
        id: SessionId,
        root: impl AsRef<Path>,
        jail: &JailConfig,
        options: SessionOptions,
    ) -> Result<Self> {
        let root = resolve_root(root.as_ref())?;
        let launched = jail::launch(&root, jail, &thread_label(&id))?;

        let session = Self {
            id,
            root,
            pid: launched.pid,
            options,
            state: Mutex::new(SessionState::Created),
            channel: Mutex::new(Channel {
                stdin: Some(launched.stdin),
                events: launched.events,
                sequence: 0,
            }),
            process: Mutex::new(launched.child),
            commands_run: AtomicU64::new(0),
        };

        match session.execute(":", Some(options.launch_timeout)) {
            Ok(_) => {
                info!(session = %session.id, pid = session.pid, "session ready");
                Ok(session)
            }
            Err(ShellJailError::ProcessTerminated { detail }) => {
                Err(ShellJailError::SandboxUnavailable(startup_failure(detail)))
            }
            // The wrapper can exit before the probe is even written.
            Err(ShellJailError::SessionDead(_)) => Err(ShellJailError::SandboxUnavailable(
                startup_failure(session.leftover_stderr()),
            )),
            Err(ShellJailError::CommandTimeout(limit)) => Err(ShellJailError::SandboxUnavailable(
                format!("interpreter did not respond within {limit:?}"),
            )),
            Err(e) => Err(e),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Canonical workspace root the interpreter is confined to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Process ID of the outermost launched process.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Disposed)
    }

    /// Number of commands run through [`ShellSession::run`] successfully.
    pub fn commands_run(&self) -> u64 {
        self.commands_run.load(Ordering::Relaxed)
    }

    /// Whether the session can still accept commands.
    ///
    /// Notices an interpreter that exited on its own and marks the session
    /// disposed.
    pub fn is_alive(&self) -> bool {
        self.ensure_alive().is_ok()
    }

    /// Run `command` and wait for its result.
    ///
    /// Blocks until the execution lock is free, then until the command
    /// completes or `timeout` (falling back to the session default) elapses.
    /// Blank commands complete immediately with exit code 0.
    ///
    /// # Errors
    ///
    /// `SessionDead` if the session is already disposed or its process has
    /// exited; `CommandTimeout` on timeout; `ProcessTerminated` if the
    /// process dies mid-command. The last two dispose the session.
    pub fn run(&self, command: &str, timeout: Option<Duration>) -> Result<CommandResult> {
        self.ensure_alive()?;
        if command.trim().is_empty() {
            return Ok(CommandResult::empty());
        }

        let result = self.execute(command, timeout.or(self.options.default_timeout))?;
        self.commands_run.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }

    /// Terminate the interpreter and mark the session disposed.
    ///
    /// Closes stdin when no command is in flight and gives the interpreter
    /// the grace period to exit before killing it; an in-flight command is
    /// killed immediately and its caller receives `ProcessTerminated`.
    /// Disposing twice is a no-op.
    pub fn dispose(&self) -> Result<()> {
        if !self.mark_disposed() {
            return Ok(());
        }

        let stdin = match self.channel.try_lock() {
            Ok(mut channel) => channel.stdin.take(),
            Err(_) => None,
        };
        let grace = if stdin.is_some() {
            self.options.dispose_grace
        } else {
            Duration::ZERO
        };

        info!(session = %self.id, pid = self.pid, "disposing session");
        self.reap(stdin, grace)
    }

    fn execute(&self, command: &str, timeout: Option<Duration>) -> Result<CommandResult> {
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| ShellJailError::LockPoisoned)?;

        // The previous holder may have disposed the session.
        self.ensure_alive()?;
        self.begin()?;

        let outcome = self.exchange(&mut channel, command, timeout);
        match &outcome {
            Ok(result) => {
                debug!(
                    session = %self.id,
                    seq = channel.sequence,
                    exit_code = result.exit_code,
                    elapsed = ?result.duration,
                    "command completed"
                );
                self.finish();
            }
            Err(err) => {
                warn!(session = %self.id, error = %err, "command failed, disposing session");
                let stdin = channel.stdin.take();
                self.mark_disposed();
                if let Err(reap_err) = self.reap(stdin, Duration::ZERO) {
                    warn!(session = %self.id, error = %reap_err, "failed to reap interpreter");
                }
            }
        }
        outcome
    }

    fn exchange(
        &self,
        channel: &mut Channel,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        channel.sequence += 1;
        let sentinel = Sentinel::generate(channel.sequence);
        let payload = encode(command, &sentinel);

        let stdin = channel
            .stdin
            .as_mut()
            .ok_or_else(|| ShellJailError::SessionDead(self.id.to_string()))?;

        let started = Instant::now();
        if let Err(e) = stdin.write_all(&payload).and_then(|()| stdin.flush()) {
            return Err(if e.kind() == ErrorKind::BrokenPipe {
                ShellJailError::SessionDead(self.id.to_string())
            } else {
                ShellJailError::Io(e)
            });
        }
        debug!(session = %self.id, seq = channel.sequence, "command sent");

        let deadline = timeout.map(|limit| (started + limit, limit));
        let mut decoder = Decoder::new(&sentinel);
        let mut drain_until: Option<Instant> = None;

        while !decoder.is_complete() {
            let now = Instant::now();
            let mut wait = POLL_INTERVAL;
            if let Some((at, limit)) = deadline {
                if now >= at {
                    return Err(ShellJailError::CommandTimeout(limit));
                }
                wait = wait.min(at - now);
            }

            match channel.events.recv_timeout(wait) {
                Ok(StreamEvent::Data(source, chunk)) => decoder.push(source, &chunk)?,
                Ok(StreamEvent::Closed(source)) => {
                    decoder.close(source);
                    if decoder.streams_closed() && !decoder.is_complete() {
                        return Err(decoder.into_terminated());
                    }
                }
                Err(RecvTimeoutError::Timeout) => match drain_until {
                    Some(limit) if Instant::now() >= limit => {
                        return Err(decoder.into_terminated());
                    }
                    Some(_) => {}
                    None => {
                        if self.state().is_terminal() || !self.process_running() {
                            drain_until = Some(Instant::now() + DRAIN_WINDOW);
                        }
                    }
                },
                Err(RecvTimeoutError::Disconnected) => return Err(decoder.into_terminated()),
            }
        }

        let elapsed = started.elapsed();
        decoder
            .finish()
            .map(|result| result.with_duration(elapsed))
            .ok_or_else(|| ShellJailError::Protocol("completion markers lost".into()))
    }

    /// Collect whatever a dead interpreter left on stderr.
    fn leftover_stderr(&self) -> String {
        let Ok(channel) = self.channel.try_lock() else {
            return String::new();
        };

        let mut stderr = Vec::new();
        let deadline = Instant::now() + DRAIN_WINDOW;
        while let Some(wait) = deadline.checked_duration_since(Instant::now()) {
            match channel.events.recv_timeout(wait) {
                Ok(StreamEvent::Data(OutputSource::Stderr, chunk)) => stderr.extend(chunk),
                Ok(StreamEvent::Closed(OutputSource::Stderr)) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&stderr).trim().to_string()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(ShellJailError::SessionDead(self.id.to_string()));
        }
        if !self.process_running() {
            info!(session = %self.id, pid = self.pid, "interpreter exited");
            self.mark_disposed();
            return Err(ShellJailError::SessionDead(self.id.to_string()));
        }
        Ok(())
    }

    fn process_running(&self) -> bool {
        match self.process.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        }
    }

    fn begin(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ShellJailError::LockPoisoned)?;
        if state.is_terminal() {
            return Err(ShellJailError::SessionDead(self.id.to_string()));
        }
        state.transition_to(SessionState::Running)
    }

    fn finish(&self) {
        if let Ok(mut state) = self.state.lock() {
            // Fails only if a concurrent dispose already won.
            let _ = state.transition_to(SessionState::Idle);
        }
    }

    /// Returns `true` if this call moved the session to `Disposed`.
    fn mark_disposed(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.transition_to(SessionState::Disposed).is_ok()
    }

    fn reap(&self, stdin: Option<ChildStdin>, grace: Duration) -> Result<()> {
        drop(stdin);

        let mut child = self
            .process
            .lock()
            .map_err(|_| ShellJailError::LockPoisoned)?;

        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = child.try_wait()? {
                debug!(session = %self.id, pid = self.pid, %status, "interpreter reaped");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(REAP_POLL);
        }

        if grace.is_zero() {
            debug!(session = %self.id, pid = self.pid, "killing interpreter");
        } else {
            warn!(
                session = %self.id,
                pid = self.pid,
                "interpreter did not exit within grace period, killing"
            );
        }

        match child.kill() {
            Ok(()) => {}
            // Already exited between try_wait and kill.
            Err(e) if e.kind() == ErrorKind::InvalidInput => {}
            Err(e) => return Err(ShellJailError::Io(e)),
        }
        child.wait()?;
        Ok(())
    }
}

impl fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!(session = %self.id, error = %e, "failed to dispose session on drop");
        }
    }
}

fn startup_failure(detail: String) -> String {
    if detail.is_empty() {
        "interpreter exited during startup".to_string()
    } else {
        detail
    }
}

fn resolve_root(root: &Path) -> Result<PathBuf> {
    if !root.is_dir() {
        return Err(ShellJailError::InvalidWorkspace(root.to_path_buf()));
    }
    root.canonicalize()
        .map_err(|_| ShellJailError::InvalidWorkspace(root.to_path_buf()))
}

/// Thread names must not contain NUL and are truncated by the OS anyway.
fn thread_label(id: &SessionId) -> String {
    let clean: String = id
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(24)
        .collect();
    format!("jail-{clean}")
}
