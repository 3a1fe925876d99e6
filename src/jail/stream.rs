//! Pumps that move interpreter output from blocking pipes into a channel.
//!
//! Each output stream gets its own thread so that a full stderr pipe can
//! never stall a reader waiting on stdout. Both pumps feed one channel,
//! which lets the session wait on either stream with a single timeout.

use std::io::{ErrorKind, Read};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use crate::execution::OutputSource;

const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Something observed on one of the interpreter's output streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Bytes read from the stream.
    Data(OutputSource, Vec<u8>),
    /// The stream reached end of file or failed; no more events follow.
    Closed(OutputSource),
}

/// Reader loop for one output stream.
pub struct StreamPump<R: Read + Send + 'static> {
    reader: R,
    source: OutputSource,
    tx: Sender<StreamEvent>,
    buffer_size: usize,
}

impl<R: Read + Send + 'static> StreamPump<R> {
    /// Create a pump forwarding `reader`'s bytes tagged with `source`.
    pub fn new(reader: R, source: OutputSource, tx: Sender<StreamEvent>) -> Self {
        Self {
            reader,
            source,
            tx,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Create with custom buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Start the loop on a named OS thread.
    pub fn spawn(self, name: String) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    /// Read until end of file, a read error, or the receiver going away.
    ///
    /// Always finishes by sending [`StreamEvent::Closed`] if the receiver
    /// is still listening.
    pub fn run(mut self) {
        let source = self.source;
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    debug!(stream = source.as_str(), "pump: EOF");
                    break;
                }
                Ok(n) => {
                    trace!(stream = source.as_str(), bytes = n, "pump: read");
                    if self
                        .tx
                        .send(StreamEvent::Data(source, buf[..n].to_vec()))
                        .is_err()
                    {
                        debug!(stream = source.as_str(), "pump: channel closed");
                        return;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() == ErrorKind::BrokenPipe {
                        debug!(stream = source.as_str(), "pump: broken pipe");
                    } else {
                        error!(stream = source.as_str(), "pump read error: {}", e);
                    }
                    break;
                }
            }
        }

        let _ = self.tx.send(StreamEvent::Closed(source));
    }
}
