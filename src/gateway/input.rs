//! The request body as seen by a handler

use crate::errors::{Error, Result};
use crate::http::Method;

use log::debug;

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A request body bounded to its declared length
///
/// Yields exactly `declared` bytes and then end of stream. If the source
/// runs dry or stalls first, reading fails with `ShortBody`.
pub struct InputChannel {
    source: Option<Box<dyn Read + Send>>,
    declared: u64,
    received: u64,
    progress: Arc<AtomicU64>
}

impl InputChannel {
    pub fn empty() -> InputChannel {
        InputChannel {
            source: None,
            declared: 0,
            received: 0,
            progress: Arc::new(AtomicU64::new(0))
        }
    }

    /// The channel for a request: empty for methods that do not forward a
    /// body, bounded to `length` otherwise
    pub fn for_request(method: &Method, length: u64,
                       source: Box<dyn Read + Send>) -> InputChannel
    {
        if !method.carries_body() || length == 0 {
            return InputChannel::empty();
        }

        InputChannel {
            source: Some(source),
            declared: length,
            received: 0,
            progress: Arc::new(AtomicU64::new(0))
        }
    }

    /// The number of bytes this channel will yield
    pub fn declared(&self) -> u64 {
        self.declared
    }

    pub fn is_empty(&self) -> bool {
        self.declared == 0
    }

    /// A live count of the bytes read so far, readable from other threads
    pub fn progress(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.progress)
    }

    fn short_body(&self) -> Error {
        Error::ShortBody { declared: self.declared, received: self.received }
    }

    fn next_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.declared - self.received;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let source = match self.source {
            Some(ref mut source) => source,
            None => return Ok(0)
        };

        let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
        let read = loop {
            match source.read(&mut buf[.. want]) {
                Ok(read) => break read,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A client that stops sending has sent a short body
                Err(ref e) if stalled(e) => return Err(Error::ShortBody {
                    declared: self.declared,
                    received: self.received
                }),
                Err(e) => return Err(Error::from(e))
            }
        };

        if read == 0 {
            return Err(self.short_body());
        }

        self.received += read as u64;
        self.progress.store(self.received, Ordering::Relaxed);
        Ok(read)
    }

    /// Copies the whole body into `sink`, then drops the sink.
    ///
    /// If the sink stops accepting bytes (the handler closed its end), the
    /// rest of the body is still read and discarded, so a short body is
    /// reported whether or not the handler consumed it.
    pub fn pump<W: Write>(mut self, mut sink: W) -> Result<u64> {
        let mut buffer = [0u8; 8192];
        let mut sink_open = true;

        loop {
            let read = self.next_chunk(&mut buffer)?;
            if read == 0 {
                return Ok(self.received);
            }

            if sink_open {
                match sink.write_all(&buffer[.. read]) {
                    Ok(()) => (),
                    Err(ref e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        debug!("Handler closed its input after {} of {} bytes",
                               self.received - read as u64, self.declared);
                        sink_open = false;
                    },
                    Err(e) => return Err(Error::from(e))
                }
            }
        }
    }
}

fn stalled(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::WouldBlock |
        io::ErrorKind::TimedOut |
        io::ErrorKind::UnexpectedEof => true,
        _ => false
    }
}

impl Read for InputChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.next_chunk(buf).map_err(|e| match e {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::UnexpectedEof,
                                    other.to_string())
        })
    }
}

impl fmt::Debug for InputChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InputChannel")
            .field("declared", &self.declared)
            .field("received", &self.received)
            .finish()
    }
}
