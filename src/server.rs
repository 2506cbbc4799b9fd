//! TCP server engine.
//!
//! Owns the listening socket, runs the blocking accept loop and spawns one
//! worker thread per accepted connection. Lifecycle:
//!
//! ```text
//! Created --start--> Started --run--> Running --stop--> Stopping --> Stopped
//!                       └──────────────stop──────────────┘
//! ```
//!
//! `stop` is the only teardown path. It triggers the shutdown token, shuts the
//! listener down so a blocked `accept` returns, shuts every live connection
//! down so blocked reads return, and joins every worker before returning.

use crate::config::Config;
use crate::runtime::{handle_connection, ConnectionRecord, ConnectionRegistry, Protocol};
use crate::shutdown::ShutdownToken;
use socket2::{Domain, Protocol as SockProtocol, SockRef, Socket, Type};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after an unexpected accept failure before accepting again.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(10);

/// Timeout for the loopback connect that wakes a blocked accept.
const WAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// How long `stop` waits for the accept loop to let go of the listener.
const ACCEPT_EXIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Started,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Created => write!(f, "created"),
            Phase::Started => write!(f, "started"),
            Phase::Running => write!(f, "running"),
            Phase::Stopping => write!(f, "stopping"),
            Phase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Bound listener and its resolved address.
#[derive(Debug, Clone)]
struct Endpoint {
    listener: Arc<TcpListener>,
    addr: SocketAddr,
}

/// Lifecycle state. The endpoint only exists while started or running.
#[derive(Debug)]
enum Lifecycle {
    Created,
    Started(Endpoint),
    Running(Endpoint),
    Stopping,
    Stopped,
}

impl Lifecycle {
    fn phase(&self) -> Phase {
        match self {
            Lifecycle::Created => Phase::Created,
            Lifecycle::Started(_) => Phase::Started,
            Lifecycle::Running(_) => Phase::Running,
            Lifecycle::Stopping => Phase::Stopping,
            Lifecycle::Stopped => Phase::Stopped,
        }
    }
}

/// Server engine errors
#[derive(Debug)]
pub enum ServerError {
    /// Socket creation, option, bind or listen failed.
    Bind { addr: SocketAddr, source: io::Error },
    /// Operation not allowed in the current phase.
    InvalidState { operation: &'static str, phase: Phase },
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind { addr, source } => {
                write!(f, "Failed to listen on {}: {}", addr, source)
            }
            ServerError::InvalidState { operation, phase } => {
                write!(f, "Cannot {} a server that is {}", operation, phase)
            }
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Io(e) => Some(e),
            ServerError::InvalidState { .. } => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// Server instance
pub struct Server {
    config: Config,
    protocol: Protocol,
    shutdown: ShutdownToken,
    lifecycle: Mutex<Lifecycle>,
    /// Signalled when `stop` reaches `Stopped`.
    stopped: Condvar,
    /// True while `run` holds a handle to the listener.
    accepting: Mutex<bool>,
    accept_exited: Condvar,
    connections: Mutex<ConnectionRegistry>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, shutdown: ShutdownToken) -> Self {
        Server {
            protocol: Protocol::from(config.protocol),
            config,
            shutdown,
            lifecycle: Mutex::new(Lifecycle::Created),
            stopped: Condvar::new(),
            accepting: Mutex::new(false),
            accept_exited: Condvar::new(),
            connections: Mutex::new(ConnectionRegistry::new()),
        }
    }

    /// Current lifecycle phase.
    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        lock(&self.lifecycle).phase()
    }

    /// Bound address while started or running.
    #[cfg(test)]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*lock(&self.lifecycle) {
            Lifecycle::Started(endpoint) | Lifecycle::Running(endpoint) => Some(endpoint.addr),
            _ => None,
        }
    }

    /// Number of connections not yet reaped.
    pub fn active_connections(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Bind and listen. Valid only once, from `Created`.
    ///
    /// On failure nothing stays open and the server remains `Created`.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = lock(&self.lifecycle);
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(ServerError::InvalidState {
                operation: "start",
                phase: lifecycle.phase(),
            });
        }

        let addr = SocketAddr::from((self.config.host, self.config.port));
        let listener = create_listener(addr, self.config.backlog)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            backlog = self.config.backlog,
            protocol = ?self.protocol,
            "Server listening"
        );

        *lifecycle = Lifecycle::Started(Endpoint {
            listener: Arc::new(listener),
            addr: local_addr,
        });

        Ok(local_addr)
    }

    /// Accept connections until shutdown. Valid only from `Started`.
    ///
    /// Blocks the calling thread; the supervisor runs it in the background.
    pub fn run(&self) -> Result<(), ServerError> {
        let listener = {
            let mut lifecycle = lock(&self.lifecycle);
            let endpoint = match &*lifecycle {
                Lifecycle::Started(endpoint) => endpoint.clone(),
                other => {
                    return Err(ServerError::InvalidState {
                        operation: "run",
                        phase: other.phase(),
                    })
                }
            };
            *lock(&self.accepting) = true;
            *lifecycle = Lifecycle::Running(endpoint.clone());
            endpoint.listener
        };

        info!("Waiting for connections");
        self.accept_loop(&listener);

        drop(listener);
        *lock(&self.accepting) = false;
        self.accept_exited.notify_all();

        info!("Accept loop stopped");
        Ok(())
    }

    fn accept_loop(&self, listener: &TcpListener) {
        while !self.shutdown.is_triggered() {
            lock(&self.connections).reap_finished();

            match listener.accept() {
                Ok((stream, peer)) => {
                    if !self.register(stream, peer) {
                        break;
                    }
                }
                Err(e) if self.shutdown.is_triggered() => {
                    debug!(error = %e, "Accept interrupted by shutdown");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    thread::sleep(ACCEPT_ERROR_PAUSE);
                }
            }
        }
    }

    /// Spawn a worker for `stream` and track it.
    ///
    /// Returns false if shutdown was requested; the connection is then
    /// dropped unserved. The check happens under the registry lock, so `stop`
    /// never misses a worker.
    fn register(&self, stream: TcpStream, peer: SocketAddr) -> bool {
        let mut connections = lock(&self.connections);
        if self.shutdown.is_triggered() {
            debug!(peer = %peer, "Dropping connection accepted during shutdown");
            return false;
        }

        let conn_id = connections.next_id();
        let stream = Arc::new(stream);
        let worker_stream = Arc::clone(&stream);
        let protocol = self.protocol;
        let shutdown = self.shutdown.clone();

        info!(conn_id, peer = %peer, "Accepted connection");

        let spawned = thread::Builder::new()
            .name(format!("conn-{conn_id}"))
            .spawn(move || handle_connection(conn_id, peer, worker_stream, protocol, shutdown));

        match spawned {
            Ok(handle) => {
                connections.insert(ConnectionRecord::new(peer, stream, handle));
            }
            Err(e) => {
                error!(conn_id, peer = %peer, error = %e, "Failed to spawn connection handler");
            }
        }

        true
    }

    /// Stop accepting, close every connection and join every worker.
    ///
    /// Idempotent: from `Created` or `Stopped` this returns immediately
    /// without touching any socket. A call that finds another `stop` in
    /// progress blocks until that one has finished.
    ///
    /// The listener is closed on return only if the platform woke the blocked
    /// `accept` within `ACCEPT_EXIT_TIMEOUT`; otherwise an error is logged and
    /// the accept loop releases it when it next wakes.
    pub fn stop(&self) {
        let endpoint = {
            let mut lifecycle = lock(&self.lifecycle);
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopping) {
                Lifecycle::Started(endpoint) | Lifecycle::Running(endpoint) => endpoint,
                Lifecycle::Stopping => {
                    let _stopped = self
                        .stopped
                        .wait_while(lifecycle, |l| matches!(l, Lifecycle::Stopping))
                        .unwrap_or_else(PoisonError::into_inner);
                    return;
                }
                other => {
                    *lifecycle = other;
                    return;
                }
            }
        };

        info!("Stopping server");
        self.shutdown.trigger();

        // Wakes a blocked accept on Linux; the loopback connect covers the rest.
        if let Err(e) = SockRef::from(&*endpoint.listener).shutdown(Shutdown::Both) {
            debug!(error = %e, "Listener shutdown failed");
        }
        wake_acceptor(endpoint.addr);
        drop(endpoint);
        self.wait_for_accept_exit();

        let records = {
            let mut connections = lock(&self.connections);
            connections.shutdown_all();
            let records = connections.drain();
            debug_assert!(connections.is_empty());
            records
        };

        let joined = records.len();
        for (conn_id, record) in records {
            let peer = record.peer;
            if record.join().is_err() {
                warn!(conn_id, peer = %peer, "Connection handler panicked");
            }
        }

        *lock(&self.lifecycle) = Lifecycle::Stopped;
        self.stopped.notify_all();
        info!(joined, "Server stopped");
    }

    /// Returns false if the accept loop still held the listener at the timeout.
    fn wait_for_accept_exit(&self) -> bool {
        let accepting = lock(&self.accepting);
        let (_accepting, timeout) = self
            .accept_exited
            .wait_timeout_while(accepting, ACCEPT_EXIT_TIMEOUT, |accepting| *accepting)
            .unwrap_or_else(PoisonError::into_inner);

        if timeout.timed_out() {
            error!("Accept loop did not exit in time; listener still open");
            return false;
        }
        true
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a blocking IPv4 listener with SO_REUSEADDR and the given backlog.
fn create_listener(addr: SocketAddr, backlog: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(SockProtocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::from(backlog))?;

    Ok(socket.into())
}

/// Connect to our own listener so a blocked accept returns.
fn wake_acceptor(addr: SocketAddr) {
    let target = if addr.ip().is_unspecified() {
        SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
    } else {
        addr
    };

    // Refused once the listener is shut down, which is fine
    let _ = TcpStream::connect_timeout(&target, WAKE_TIMEOUT);
}
