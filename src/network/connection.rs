//! Connection
//!
//! One accepted client socket: framed reads, raw writes, close hooks and the
//! per-tick update buffer.

use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Result, TicknetError};
use crate::logging::Logger;
use crate::protocol::{encode_frame, encode_tick_update, read_body, read_length_prefix};

type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// A single client connection
///
/// ## Concurrency:
/// - Shared as `Arc<Connection>`; every method takes `&self`
/// - `read_message` is called from one reader thread
/// - `buffer_update`/`flush` are called from the tick thread
/// - `close` may race between the two; the `closed` flag is claimed with a
///   compare-and-swap so only one caller runs the hooks and releases the socket
pub struct Connection {
    /// Unique, immutable identifier
    id: String,

    /// Peer address for logging
    peer_addr: String,

    /// Write half; `&TcpStream` implements `Write`
    stream: TcpStream,

    /// Read half (buffered)
    reader: Mutex<BufReader<TcpStream>>,

    /// Bytes collected since the previous flush
    updates: Mutex<BytesMut>,

    closed: AtomicBool,

    /// Run once, in registration order, when the connection closes
    close_hooks: Mutex<Vec<CloseHook>>,

    logger: Logger,
}

impl Connection {
    /// Wrap an accepted socket
    ///
    /// Assigns a fresh identifier and derives a connection logger from
    /// `logger`.
    pub fn new(stream: TcpStream, logger: &Logger) -> Result<Self> {
        Self::with_capacity(stream, logger, 0)
    }

    /// Like [`Connection::new`], preallocating the update buffer
    pub fn with_capacity(stream: TcpStream, logger: &Logger, capacity: usize) -> Result<Self> {
        let id = Uuid::new_v4().to_string();

        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;

        let logger = logger.for_connection(&id).with_field("peer", &peer_addr);

        Ok(Self {
            id,
            peer_addr,
            stream,
            reader: Mutex::new(BufReader::new(read_stream)),
            updates: Mutex::new(BytesMut::with_capacity(capacity)),
            closed: AtomicBool::new(false),
            close_hooks: Mutex::new(Vec::new()),
            logger,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the connection
    ///
    /// The first call runs every close hook in registration order and then
    /// shuts the socket down, returning the shutdown error if any. Later
    /// calls do nothing and return `Ok(())`.
    pub fn close(&self) -> std::io::Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        self.logger.info("Closing connection");

        // Hooks run outside the lock so they may touch this connection
        let hooks = std::mem::take(&mut *self.close_hooks.lock());
        for hook in hooks {
            hook();
        }

        self.stream.shutdown(Shutdown::Both)
    }

    /// Close, logging a failed socket shutdown instead of returning it
    pub fn close_logged(&self) {
        if let Err(e) = self.close() {
            self.logger.with_error(&e).debug("Socket shutdown failed");
        }
    }

    /// Register a callback to run when the connection closes
    ///
    /// A hook registered after the connection has closed never runs.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.close_hooks.lock().push(Box::new(hook));
    }

    // =========================================================================
    // Reads and writes
    // =========================================================================

    /// Write bytes to the socket as-is
    ///
    /// No framing is added. The I/O error is returned unmodified.
    pub fn write_message(&self, bytes: &[u8]) -> std::io::Result<()> {
        (&self.stream).write_all(bytes)
    }

    /// Frame `body` and write it
    pub fn write_frame(&self, body: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TicknetError::ConnectionClosed);
        }
        let frame = encode_frame(body)?;
        self.write_message(&frame)?;
        Ok(())
    }

    /// Read one frame, blocking until it has fully arrived
    ///
    /// If the length prefix cannot be read because the connection was
    /// already closed, an empty body is returned instead of an error. A
    /// failure while reading the body is always an error and the rest of
    /// that frame is abandoned.
    pub fn read_message(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock();

        let body_len = match read_length_prefix(&mut *reader) {
            Ok(len) => len,
            Err(_) if self.is_closed() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(read_body(&mut *reader, body_len)?)
    }

    // =========================================================================
    // Tick updates
    // =========================================================================

    /// Append bytes to the update buffer
    ///
    /// Ignored once the connection is closed.
    pub fn buffer_update(&self, bytes: &[u8]) {
        if self.is_closed() {
            return;
        }
        self.updates.lock().extend_from_slice(bytes);
    }

    /// Bytes waiting for the next flush
    pub fn pending_bytes(&self) -> usize {
        self.updates.lock().len()
    }

    /// Send everything buffered since the previous flush as one tick update
    ///
    /// Does nothing when the buffer is empty. A failed write closes the
    /// connection unless it was already closed. The buffer is empty
    /// afterwards either way.
    pub fn flush(&self, tick: u32) {
        // Take the contents and release the lock before writing, so close
        // hooks triggered below can buffer without deadlocking.
        let pending = {
            let mut updates = self.updates.lock();
            if updates.is_empty() {
                return;
            }
            updates.split()
        };

        let body = encode_tick_update(tick, &pending);
        let result = encode_frame(&body)
            .and_then(|frame| self.write_message(&frame).map_err(TicknetError::from));

        if let Err(e) = result {
            if self.is_closed() {
                return;
            }
            self.logger.with_error(&e).error("Failed to write updates");
            self.close_logged();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The tick-facing side of a connection
///
/// What game code needs to push updates, without depending on the socket
/// type. Implemented by [`Connection`]; drivers can also take test doubles.
pub trait TickConnection: Send + Sync {
    /// Write bytes as-is, returning the raw I/O error
    fn write_message(&self, bytes: &[u8]) -> std::io::Result<()>;

    /// Append bytes to the update buffer
    fn buffer_update(&self, bytes: &[u8]);

    /// Send the buffered bytes as one tick update
    fn flush(&self, tick: u32);

    fn logger(&self) -> &Logger;
}

impl TickConnection for Connection {
    fn write_message(&self, bytes: &[u8]) -> std::io::Result<()> {
        Connection::write_message(self, bytes)
    }

    fn buffer_update(&self, bytes: &[u8]) {
        Connection::buffer_update(self, bytes)
    }

    fn flush(&self, tick: u32) {
        Connection::flush(self, tick)
    }

    fn logger(&self) -> &Logger {
        Connection::logger(self)
    }
}
