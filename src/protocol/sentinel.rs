//! Completion markers.

use uuid::Uuid;

const HEAD: &str = "__SHELL_JAIL_";

/// A pair of markers identifying the end of one command's output.
///
/// Each marker is split into a fixed head and a per-invocation tail. The
/// encoded command prints them as two separate `printf` arguments, so the
/// full marker only ever exists in the interpreter's output, never in the
/// text written to its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    out_tail: String,
    err_tail: String,
}

impl Sentinel {
    /// Generate markers for the `sequence`-th command of a session.
    ///
    /// The sequence number keeps markers distinct within a session even if
    /// the random token were ever to repeat.
    pub fn generate(sequence: u64) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self::from_token(sequence, &token)
    }

    fn from_token(sequence: u64, token: &str) -> Self {
        Self {
            out_tail: format!("{sequence:x}_{token}_OUT__"),
            err_tail: format!("{sequence:x}_{token}_ERR__"),
        }
    }

    /// Head shared by both markers.
    pub fn head(&self) -> &'static str {
        HEAD
    }

    /// Tail of the stdout marker.
    pub fn out_tail(&self) -> &str {
        &self.out_tail
    }

    /// Tail of the stderr marker.
    pub fn err_tail(&self) -> &str {
        &self.err_tail
    }

    /// Full stdout marker as it appears in output.
    pub fn stdout_marker(&self) -> Vec<u8> {
        format!("{HEAD}{}", self.out_tail).into_bytes()
    }

    /// Full stderr marker as it appears in output.
    pub fn stderr_marker(&self) -> Vec<u8> {
        format!("{HEAD}{}", self.err_tail).into_bytes()
    }
}
