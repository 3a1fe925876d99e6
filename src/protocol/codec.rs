//! Framing of commands and recovery of their results from raw streams.

use super::Sentinel;
use crate::error::ShellJailError;
use crate::execution::{CommandResult, OutputSource};
use crate::Result;

/// Shell variable holding the command's status between the command and
/// the marker lines.
const STATUS_VAR: &str = "__shell_jail_status";

/// Shell variable holding the command text.
const COMMAND_VAR: &str = "__shell_jail_command";

/// Frame `command` for a POSIX shell reading its script from stdin.
///
/// The framed script:
/// 1. installs an `EXIT` trap that prints both markers, so `exit N` still
///    reports `N`;
/// 2. reads the command text from a quoted here-document, so unbalanced
///    quotes or brackets cannot swallow the rest of the frame;
/// 3. checks its syntax with `"$0" -n` in a separate process, and only
///    if that passes `eval`s it in the current shell (so `cd` and `export`
///    stick) with stdin from `/dev/null`;
/// 4. removes the trap and prints the stdout marker plus status on stdout
///    and the stderr marker on stderr.
///
/// A command that fails the syntax check reports the checker's status
/// and diagnostics without touching the session's shell. Any `EXIT` trap
/// the caller installed is replaced.
pub fn encode(command: &str, sentinel: &Sentinel) -> Vec<u8> {
    let head = sentinel.head();
    let out = sentinel.out_tail();
    let err = sentinel.err_tail();
    let delimiter = format!("{head}CMD_{out}");

    let mut script = String::with_capacity(command.len() + 768);
    script.push_str(&format!(
        "trap \"printf '%s%s %s\\n' '{head}' '{out}' \\$?; printf '%s%s\\n' '{head}' '{err}' >&2\" EXIT\n"
    ));
    script.push_str(&format!("{COMMAND_VAR}=$(cat <<'{delimiter}'\n"));
    script.push_str(command);
    if !command.ends_with('\n') {
        script.push('\n');
    }
    script.push_str(&format!("{delimiter}\n)\n"));
    script.push_str(&format!(
        "if \"$0\" -n -c \"${COMMAND_VAR}\" </dev/null; then\n\
         eval \"${COMMAND_VAR}\" </dev/null\n\
         {STATUS_VAR}=$?\n\
         else\n\
         {STATUS_VAR}=$?\n\
         fi\n"
    ));
    script.push_str("trap - EXIT\n");
    script.push_str(&format!(
        "printf '%s%s %s\\n' '{head}' '{out}' \"${STATUS_VAR}\"\n"
    ));
    script.push_str(&format!("printf '%s%s\\n' '{head}' '{err}' >&2\n"));
    script.push_str(&format!("unset {STATUS_VAR} {COMMAND_VAR}\n"));
    script.into_bytes()
}

/// Incremental decoder for one command's output.
///
/// Feed it chunks from either stream in arrival order. It completes once
/// the stdout marker and its status line and the stderr marker have all
/// been seen. Anything after a marker is discarded.
#[derive(Debug)]
pub struct Decoder {
    stdout_marker: Vec<u8>,
    stderr_marker: Vec<u8>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_scanned: usize,
    stderr_scanned: usize,
    stdout_end: Option<usize>,
    stderr_end: Option<usize>,
    exit_code: Option<i32>,
    stdout_closed: bool,
    stderr_closed: bool,
}

impl Decoder {
    /// Create a decoder waiting for `sentinel`'s markers.
    pub fn new(sentinel: &Sentinel) -> Self {
        Self {
            stdout_marker: sentinel.stdout_marker(),
            stderr_marker: sentinel.stderr_marker(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_scanned: 0,
            stderr_scanned: 0,
            stdout_end: None,
            stderr_end: None,
            exit_code: None,
            stdout_closed: false,
            stderr_closed: false,
        }
    }

    /// Append a chunk read from `source`.
    ///
    /// Fails only if the status after the stdout marker is not an integer.
    pub fn push(&mut self, source: OutputSource, chunk: &[u8]) -> Result<()> {
        match source {
            OutputSource::Stdout => {
                if self.exit_code.is_some() {
                    return Ok(());
                }
                self.stdout.extend_from_slice(chunk);
                self.scan_stdout()
            }
            OutputSource::Stderr => {
                if self.stderr_end.is_some() {
                    return Ok(());
                }
                self.stderr.extend_from_slice(chunk);
                if let Some(pos) = find_from(&self.stderr, &self.stderr_marker, self.stderr_scanned)
                {
                    self.stderr_end = Some(pos);
                } else {
                    self.stderr_scanned = resume_point(self.stderr.len(), self.stderr_marker.len());
                }
                Ok(())
            }
        }
    }

    fn scan_stdout(&mut self) -> Result<()> {
        let marker_at = match self.stdout_end {
            Some(pos) => pos,
            None => match find_from(&self.stdout, &self.stdout_marker, self.stdout_scanned) {
                Some(pos) => {
                    self.stdout_end = Some(pos);
                    pos
                }
                None => {
                    self.stdout_scanned =
                        resume_point(self.stdout.len(), self.stdout_marker.len());
                    return Ok(());
                }
            },
        };

        let status_start = marker_at + self.stdout_marker.len();
        let Some(line_len) = self.stdout[status_start..].iter().position(|b| *b == b'\n') else {
            return Ok(());
        };

        let token = &self.stdout[status_start..status_start + line_len];
        let text = String::from_utf8_lossy(token);
        let code = text.trim().parse::<i32>().map_err(|_| {
            ShellJailError::Protocol(format!("invalid exit status {:?}", text.trim()))
        })?;
        self.exit_code = Some(code);
        Ok(())
    }

    /// Record that `source` reached end of file.
    pub fn close(&mut self, source: OutputSource) {
        match source {
            OutputSource::Stdout => self.stdout_closed = true,
            OutputSource::Stderr => self.stderr_closed = true,
        }
    }

    /// Both markers and the exit status have been seen.
    pub fn is_complete(&self) -> bool {
        self.exit_code.is_some() && self.stderr_end.is_some()
    }

    /// Both streams hit end of file.
    pub fn streams_closed(&self) -> bool {
        self.stdout_closed && self.stderr_closed
    }

    /// Split the accumulated bytes into a result, if complete.
    pub fn finish(self) -> Option<CommandResult> {
        match (self.exit_code, self.stdout_end, self.stderr_end) {
            (Some(code), Some(out_end), Some(err_end)) => {
                let mut stdout = self.stdout;
                stdout.truncate(out_end);
                let mut stderr = self.stderr;
                stderr.truncate(err_end);
                Some(CommandResult::new(code, stdout, stderr))
            }
            _ => None,
        }
    }

    /// Turn an incomplete exchange into the error reported to the caller.
    pub fn into_terminated(self) -> ShellJailError {
        let end = self.stderr_end.unwrap_or(self.stderr.len());
        let detail = String::from_utf8_lossy(&self.stderr[..end]).trim().to_string();
        ShellJailError::ProcessTerminated { detail }
    }
}

/// Where the next search may start without missing a marker split across
/// chunk boundaries.
fn resume_point(len: usize, marker_len: usize) -> usize {
    len.saturating_sub(marker_len.saturating_sub(1))
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
