//! TCP Listener
//!
//! Accepts connections and hands them to the driver over a rendezvous
//! channel.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, select_biased, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, TicknetError};
use crate::logging::Logger;

use super::Connection;

/// `EBADF`: accept on a descriptor that has been closed
const EBADF: i32 = 9;

/// TCP listener for ticknet
///
/// ## Shutdown:
/// `stop` sets `stopping` and drops `done_tx`, which wakes any `select` in
/// the accept loop. The delivery channel disconnects once both the
/// listener's sender and the accept loop's clone are gone, so consumers see
/// the end of the stream only after the loop has exited.
pub struct Listener {
    config: Config,
    logger: Logger,

    /// Set by `stop`; checked before every delivery
    stopping: AtomicBool,

    /// Address actually bound, once `start`/`spawn` has bound
    local_addr: Mutex<Option<SocketAddr>>,

    /// Producer side of the delivery channel
    conn_tx: Mutex<Option<Sender<Connection>>>,

    /// Consumer side, cloned out by `connections`
    conn_rx: Receiver<Connection>,

    /// Dropped by `stop` to signal shutdown
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

impl Listener {
    /// Create a listener for `config.listen_addr`
    pub fn new(config: Config, logger: Logger) -> Self {
        // Unbuffered: each delivery waits for a consumer
        let (conn_tx, conn_rx) = channel::bounded(0);
        let (done_tx, done_rx) = channel::bounded(0);

        Self {
            config,
            logger,
            stopping: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            conn_tx: Mutex::new(Some(conn_tx)),
            conn_rx,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }

    /// Receiver of newly accepted connections
    ///
    /// Disconnects after `stop` once the accept loop has exited.
    pub fn connections(&self) -> Receiver<Connection> {
        self.conn_rx.clone()
    }

    /// The bound address, if bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Bind and run the accept loop on the calling thread
    ///
    /// Returns when `stop` is called or the listening socket is closed.
    pub fn start(&self) -> Result<()> {
        let socket = self.bind()?;
        self.accept_loop(socket)
    }

    /// Bind on the calling thread, then run the accept loop on a new one
    ///
    /// Bind failures are returned here rather than from the thread.
    pub fn spawn(self: &Arc<Self>) -> Result<(JoinHandle<Result<()>>, SocketAddr)> {
        let socket = self.bind()?;
        let addr = socket.local_addr()?;

        let listener = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("ticknet-accept".to_string())
            .spawn(move || listener.accept_loop(socket))?;

        Ok((handle, addr))
    }

    /// Signal the listener to stop
    ///
    /// No further connections are delivered after this returns.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.logger.info("Stopping TCP listener");
        self.done_tx.lock().take();
        self.conn_tx.lock().take();
    }

    fn bind(&self) -> Result<TcpListener> {
        let addr = &self.config.listen_addr;
        let socket = TcpListener::bind(addr).map_err(|source| TicknetError::Bind {
            addr: addr.clone(),
            source,
        })?;

        // Non-blocking so the loop can observe `stop` between accepts
        socket.set_nonblocking(true)?;

        let local = socket.local_addr()?;
        *self.local_addr.lock() = Some(local);
        self.logger.info(&format!("TCP listener listening on {}", local));

        Ok(socket)
    }

    fn accept_loop(&self, socket: TcpListener) -> Result<()> {
        // Keep our own sender so `stop` can drop the shared one at any time
        let conn_tx = match self.conn_tx.lock().clone() {
            Some(tx) => tx,
            None => return Ok(()),
        };
        let poll_interval = self.config.accept_poll_interval();

        loop {
            if self.is_stopping() {
                break;
            }

            let (stream, peer) = match socket.accept() {
                Ok(accepted) => accepted,
                Err(e) => match classify_accept_error(&e) {
                    AcceptFailure::Interrupted => continue,
                    AcceptFailure::ListenerClosed => break,
                    AcceptFailure::Idle => {
                        if self.wait_for_stop(poll_interval) {
                            break;
                        }
                        continue;
                    }
                    AcceptFailure::Transient => {
                        self.logger.with_error(&e).error("Accept failed");
                        if self.wait_for_stop(poll_interval) {
                            break;
                        }
                        continue;
                    }
                },
            };

            if self.is_stopping() {
                // Dropping the stream closes it
                drop(stream);
                break;
            }

            self.logger.debug(&format!("Client connected: {}", peer));

            let conn = match self.prepare(stream) {
                Ok(conn) => conn,
                Err(e) => {
                    self.logger
                        .with_error(&e)
                        .with_field("peer", peer)
                        .warn("Dropping connection");
                    continue;
                }
            };

            select_biased! {
                // Stopped while waiting for a consumer; the undelivered
                // connection is dropped, which closes its socket
                recv(self.done_rx) -> _ => break,
                // Cannot disconnect: the listener holds a receiver
                send(conn_tx, conn) -> _ => {}
            }
        }

        self.logger.info("TCP listener stopped");
        Ok(())
    }

    /// Turn an accepted stream into a `Connection`
    fn prepare(&self, stream: std::net::TcpStream) -> Result<Connection> {
        // Accepted sockets can inherit non-blocking mode from the listener
        stream.set_nonblocking(false)?;
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }
        Connection::with_capacity(stream, &self.logger, self.config.update_buffer_capacity)
    }

    /// Sleep up to `timeout`, returning true early if `stop` was called
    fn wait_for_stop(&self, timeout: std::time::Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Err(channel::RecvTimeoutError::Timeout) => self.is_stopping(),
            _ => true,
        }
    }
}

/// What the accept loop does with a failed `accept`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Nothing pending; wait a poll interval
    Idle,

    /// Retry immediately
    Interrupted,

    /// The listening socket itself is gone; stop without error
    ListenerClosed,

    /// Log, back off one poll interval, keep accepting
    Transient,
}

fn classify_accept_error(err: &io::Error) -> AcceptFailure {
    match err.kind() {
        io::ErrorKind::WouldBlock => AcceptFailure::Idle,
        io::ErrorKind::Interrupted => AcceptFailure::Interrupted,
        io::ErrorKind::InvalidInput => AcceptFailure::ListenerClosed,
        _ if err.raw_os_error() == Some(EBADF) => AcceptFailure::ListenerClosed,
        _ => AcceptFailure::Transient,
    }
}
