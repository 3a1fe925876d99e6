//! Command-line interface for shell-jail.
//!
//! Uses lexopt to keep the binary small.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Workspace root; defaults to the current directory.
    pub root: Option<PathBuf>,
    /// Session identifier; generated when absent.
    pub session: Option<String>,
    /// Per-command timeout.
    pub timeout: Option<Duration>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Run without a sandbox.
    pub unconfined: bool,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
    /// Commands to run, in order.
    pub commands: Vec<String>,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('r') | Long("root") => {
                result.root = Some(parser.value()?.parse()?);
            }
            Short('s') | Long("session") => {
                result.session = Some(parser.value()?.parse()?);
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                let secs: f64 = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("timeout", value.clone()))?;
                result.timeout = Some(
                    Duration::try_from_secs_f64(secs)
                        .map_err(|_| ArgsError::InvalidValue("timeout", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Long("unconfined") => {
                result.unconfined = true;
            }
            Value(val) => {
                let command = val
                    .into_string()
                    .map_err(|v| ArgsError::InvalidValue("command", v.to_string_lossy().into()))?;
                result.commands.push(command);
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shell-jail {version}
Run commands in a persistent, sandboxed shell session

USAGE:
    shell-jail [OPTIONS] <COMMAND>...

Each COMMAND runs in the same session, in order; one JSON object per
command is printed to stdout.

OPTIONS:
    -r, --root <DIR>        Workspace root [default: current directory]
    -s, --session <ID>      Session identifier [default: generated]
    -t, --timeout <SECS>    Per-command timeout in seconds
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
        --unconfined        Run without a sandbox (no isolation)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    SHELL_JAIL_SANDBOX      Sandbox: bubblewrap or unconfined
    SHELL_JAIL_BWRAP        Path to the bubblewrap binary
    SHELL_JAIL_TIMEOUT      Default per-command timeout in seconds
    SHELL_JAIL_LOG_LEVEL    Log level (overrides config)
    RUST_LOG                Alternative log level setting

EXAMPLES:
    # State carries over between commands
    shell-jail -r ./workspace 'cd src' 'ls'

    # Bound every command to five seconds
    shell-jail -t 5 -r ./workspace 'make test'
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shell-jail {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
