//! Per-connection request loop shared by every server flavor

use std::io::{self, Read, Write};
use std::net::TcpStream;

use bytes::BytesMut;
use memkvcache::Storage;
use tracing::debug;

use crate::protocol;

const READ_CHUNK: usize = 4096;

/// Buffered protocol state for one client
pub struct Session {
    buffer: BytesMut,
    closed: bool,
}

impl Session {
    /// Create an empty session
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK),
            closed: false,
        }
    }

    /// Mutable access to the input buffer, for async readers
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Whether the client asked to close the connection
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append received bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Execute every complete request in the buffer and collect the replies.
    ///
    /// A malformed request gets its error reply and the rest of the buffer
    /// is discarded.
    pub fn process(&mut self, storage: &dyn Storage) -> Vec<u8> {
        let mut out = Vec::new();

        while !self.closed {
            match protocol::parse(&mut self.buffer) {
                Ok(Some(command)) => {
                    if let Some(reply) = command.execute(storage) {
                        out.extend_from_slice(&reply);
                        out.extend_from_slice(b"\r\n");
                    }
                    self.closed = command.closes_connection();
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Parse error: {}", e);
                    out.extend_from_slice(e.reply().as_bytes());
                    out.extend_from_slice(b"\r\n");
                    self.buffer.clear();
                    break;
                }
            }
        }

        out
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve one client on a blocking socket until it disconnects or quits
pub fn serve_blocking(mut stream: TcpStream, storage: &dyn Storage) -> io::Result<()> {
    let mut session = Session::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }

        session.feed(&chunk[..n]);
        let reply = session.process(storage);
        if !reply.is_empty() {
            stream.write_all(&reply)?;
        }
        if session.is_closed() {
            return Ok(());
        }
    }
}
