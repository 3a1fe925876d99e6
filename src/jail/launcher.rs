//! Spawns the interpreter behind its sandbox with piped standard streams.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver};

use tracing::{info, warn};

use super::{BubblewrapOptions, JailConfig, Sandbox, StreamEvent, StreamPump};
use crate::error::ShellJailError;
use crate::execution::OutputSource;
use crate::Result;

/// A freshly spawned interpreter and its plumbing.
pub struct LaunchedProcess {
    /// The outermost process (the sandbox wrapper, or the interpreter itself
    /// when unconfined).
    pub child: Child,
    /// Write end of the interpreter's stdin.
    pub stdin: ChildStdin,
    /// Output of both streams, in arrival order per stream.
    pub events: Receiver<StreamEvent>,
    /// Process ID of `child`.
    pub pid: u32,
}

/// Find `program` the way `execvp` would.
///
/// Paths containing a separator are checked directly; bare names are
/// searched in `PATH`.
pub fn locate_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Arguments passed to bubblewrap for a jail rooted at `root`.
pub fn bubblewrap_args(opts: &BubblewrapOptions, root: &Path, interpreter: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--die-with-parent",
        "--unshare-user-try",
        "--unshare-pid",
        "--unshare-ipc",
    ]
    .iter()
    .map(OsString::from)
    .collect();

    if !opts.share_net {
        args.push("--unshare-net".into());
    }

    args.push("--bind".into());
    args.push(root.as_os_str().to_owned());
    args.push("/".into());

    for arg in ["--tmpfs", "/tmp", "--dev-bind-try", "/dev", "/dev", "--proc", "/proc"] {
        args.push(arg.into());
    }

    for path in &opts.ro_binds {
        args.push("--ro-bind".into());
        args.push(path.as_os_str().to_owned());
        args.push(path.as_os_str().to_owned());
    }
    for path in &opts.optional_ro_binds {
        args.push("--ro-bind-try".into());
        args.push(path.as_os_str().to_owned());
        args.push(path.as_os_str().to_owned());
    }

    args.push("--chdir".into());
    args.push("/".into());
    args.push(interpreter.as_os_str().to_owned());
    args
}

fn build_command(root: &Path, jail: &JailConfig) -> Result<Command> {
    let mut command = match &jail.sandbox {
        Sandbox::Bubblewrap(opts) => {
            let program = locate_program(&opts.program).ok_or_else(|| {
                ShellJailError::SandboxUnavailable(format!(
                    "bubblewrap ({}) is required but was not found in PATH",
                    opts.program.display()
                ))
            })?;
            let mut command = Command::new(program);
            command.args(bubblewrap_args(opts, root, &jail.interpreter));
            command
        }
        Sandbox::Unconfined => {
            warn!(
                root = %root.display(),
                "launching interpreter without a sandbox"
            );
            Command::new(&jail.interpreter)
        }
    };

    command
        .current_dir(root)
        .env_clear()
        .envs(&jail.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    Ok(command)
}

/// Spawn the interpreter for `root` under `jail`.
///
/// `label` names the pump threads. A missing or unexecutable sandbox
/// binary is reported as [`ShellJailError::SandboxUnavailable`]; whether
/// the sandbox actually works is only known once the interpreter answers,
/// which the session checks right after launch.
pub fn launch(root: &Path, jail: &JailConfig, label: &str) -> Result<LaunchedProcess> {
    let mut command = build_command(root, jail)?;

    let mut child = command.spawn().map_err(|e| match (&jail.sandbox, e.kind()) {
        (Sandbox::Bubblewrap(opts), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            ShellJailError::SandboxUnavailable(format!(
                "failed to start {}: {}",
                opts.program.display(),
                e
            ))
        }
        _ => ShellJailError::Io(e),
    })?;

    let pid = child.id();
    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ShellJailError::Io(std::io::Error::new(
            ErrorKind::Other,
            "interpreter pipes were not captured",
        )));
    };

    let (tx, events) = mpsc::channel();
    let pumps = StreamPump::new(stdout, OutputSource::Stdout, tx.clone())
        .spawn(format!("{label}-stdout"))
        .and_then(|_| {
            StreamPump::new(stderr, OutputSource::Stderr, tx).spawn(format!("{label}-stderr"))
        });
    if let Err(e) = pumps {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ShellJailError::Io(e));
    }

    info!(
        pid,
        sandbox = jail.sandbox.name(),
        root = %root.display(),
        "interpreter launched"
    );

    Ok(LaunchedProcess {
        child,
        stdin,
        events,
        pid,
    })
}
