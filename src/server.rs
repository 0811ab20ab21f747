//! TCP listener and server lifecycle.
//!
//! Walks the state machine
//! `Init -> Bound -> (Daemonized) -> Serving -> ShuttingDown -> Terminated`:
//! binds the fixed port, optionally detaches, accepts connections one at a
//! time and hands each to a `Connection`, then removes the record log once a
//! shutdown request ends the accept loop.

use crate::config::Config;
use crate::runtime::{daemon, Connection, Lifecycle};
use crate::storage::LogStore;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::os::unix::io::AsRawFd;
use tracing::{debug, error, info, warn};

/// Where the server is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    Bound,
    Daemonized,
    Serving,
    ShuttingDown,
    Terminated,
}

/// Fatal startup errors.
#[derive(Debug)]
pub enum ServerError {
    Bind(SocketAddr, io::Error),
    Signal(io::Error),
    Daemonize(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Failed to listen on {addr}: {e}"),
            ServerError::Signal(e) => write!(f, "Failed installing signal handlers: {e}"),
            ServerError::Daemonize(e) => write!(f, "daemonize failed: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(_, e) | ServerError::Signal(e) | ServerError::Daemonize(e) => Some(e),
        }
    }
}

/// Server instance
pub struct Server<'a> {
    config: Config,
    store: LogStore,
    lifecycle: &'a Lifecycle,
    listener: TcpListener,
    state: ServerState,
}

impl<'a> Server<'a> {
    /// Bind and listen on `0.0.0.0:<port>`.
    ///
    /// Nothing else happens until this succeeds, in particular no
    /// daemonization.
    pub fn bind(config: Config, lifecycle: &'a Lifecycle) -> Result<Self, ServerError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
        debug!(state = ?ServerState::Init, "Binding listener");

        let listener =
            create_listener(addr, config.backlog).map_err(|e| ServerError::Bind(addr, e))?;
        let store = LogStore::new(&config.data_file, config.sync_on_append);

        info!(
            addr = %listener.local_addr().unwrap_or(addr),
            backlog = config.backlog,
            data_file = %config.data_file.display(),
            "Server listening"
        );

        Ok(Server {
            config,
            store,
            lifecycle,
            listener,
            state: ServerState::Bound,
        })
    }

    /// Detach into the background, keeping the bound listener.
    ///
    /// Only valid straight after `bind`, while the process is single-threaded.
    pub fn daemonize(&mut self) -> Result<(), ServerError> {
        debug_assert_eq!(self.state, ServerState::Bound);
        daemon::detach().map_err(ServerError::Daemonize)?;
        self.transition(ServerState::Daemonized);
        info!(pid = std::process::id(), "Running as daemon");
        Ok(())
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn state(&self) -> ServerState {
        self.state
    }

    #[cfg(test)]
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Accept and serve connections until shutdown is requested, then remove
    /// the record log. Returns the final state.
    pub fn run(mut self) -> ServerState {
        self.transition(ServerState::Serving);
        self.accept_loop();

        self.transition(ServerState::ShuttingDown);
        info!("Caught signal, exiting");
        if let Err(e) = self.store.remove() {
            warn!(path = %self.store.path().display(), error = %e, "Failed to remove record log");
        }

        self.transition(ServerState::Terminated);
        self.state
    }

    fn accept_loop(&self) {
        let _registration = self.lifecycle.watch_listener(self.listener.as_raw_fd());

        while !self.lifecycle.is_shutting_down() {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(_) if self.lifecycle.is_shutting_down() => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept() failed");
                    continue;
                }
            };

            let ip = peer.ip();
            info!("Accepted connection from {ip}");

            let conn = Connection::new(
                stream,
                peer,
                self.config.recv_chunk_size,
                self.config.max_pending_bytes,
            );
            match conn.serve(&self.store, self.lifecycle) {
                Ok(outcome) => debug!(peer = %peer, ?outcome, "Session ended"),
                Err(e) => error!(peer = %peer, error = %e, "Connection error"),
            }

            info!("Closed connection from {ip}");
        }
    }

    fn transition(&mut self, next: ServerState) {
        debug!(from = ?self.state, to = ?next, "Server state change");
        self.state = next;
    }
}

/// Create a blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
