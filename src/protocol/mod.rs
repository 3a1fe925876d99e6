//! Sentinel protocol spoken with the jailed interpreter.
//!
//! A shell reading commands from a pipe has no message framing: its stdout
//! and stderr are plain byte streams. Every command is therefore wrapped so
//! that, once it finishes, the shell prints a unique marker and the exit
//! status on stdout and a second marker on stderr. The [`Decoder`] collects
//! both streams until it has seen both markers.
//!
//! ```
//! use shell_jail::protocol::{encode, Decoder, Sentinel};
//! use shell_jail::execution::OutputSource;
//!
//! let sentinel = Sentinel::generate(0);
//! let script = encode("echo hi", &sentinel);
//! assert!(String::from_utf8_lossy(&script).contains("echo hi"));
//!
//! let mut decoder = Decoder::new(&sentinel);
//! let mut stdout = b"hi\n".to_vec();
//! stdout.extend(sentinel.stdout_marker());
//! stdout.extend_from_slice(b" 0\n");
//! decoder.push(OutputSource::Stdout, &stdout).unwrap();
//! decoder.push(OutputSource::Stderr, &sentinel.stderr_marker()).unwrap();
//!
//! let result = decoder.finish().unwrap();
//! assert_eq!(result.stdout, b"hi\n");
//! ```

mod codec;
mod sentinel;

pub use codec::{encode, Decoder};
pub use sentinel::Sentinel;
