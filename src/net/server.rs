//! Server instances: one listening socket bound to one accept loop.
//!
//! # Responsibilities
//! - Define the `ServerInstance`/`ServerFactory` seam used by topology construction
//! - Bind at construction, listen at `start`, accept on the owning loop
//! - Hand accepted streams round-robin to injected I/O loops
//! - Run the optional TLS handshake before delivering a connection

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use socket2::{SockRef, Socket};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::callbacks::ListenerCallbacks;
use super::connection::{Connection, Stream};
use super::event_loop::EventLoop;
use super::socket::{bind_socket, LISTEN_BACKLOG};
use super::tls::{ReloadableTls, TlsError, TlsPolicy};

/// Pause after a failed accept (e.g. EMFILE) before retrying.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to listen on {address}: {source}")]
    Listen {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server {0} was already started")]
    AlreadyStarted(String),

    #[error("Server {0} was stopped and cannot be restarted")]
    Stopped(String),
}

/// A realized listener.
///
/// Created once during topology construction and started at most once.
pub trait ServerInstance: Send + Sync {
    fn name(&self) -> &str;

    /// Address the socket is bound to (the actual port if 0 was requested).
    fn address(&self) -> SocketAddr;

    /// Loop that owns the listening socket.
    fn accept_loop(&self) -> &EventLoop;

    /// Loops accepted connections are distributed to. Empty means the
    /// accept loop services them itself.
    fn io_loops(&self) -> &[EventLoop];

    fn set_io_loops(&mut self, loops: Vec<EventLoop>);

    fn apply_callbacks(&mut self, callbacks: &ListenerCallbacks);

    fn enable_tls(&mut self, policy: TlsPolicy) -> Result<(), TlsError>;

    fn tls_policy(&self) -> Option<&TlsPolicy>;

    fn tls_enabled(&self) -> bool {
        self.tls_policy().is_some()
    }

    /// Begin accepting. Returns once the accept task is scheduled.
    fn start(&self) -> Result<(), ServerError>;

    /// Stop accepting. Established connections are left alone.
    fn stop(&self);

    /// Re-read certificate material. A no-op for plain listeners.
    fn reload_tls(&self) -> Result<(), TlsError>;
}

/// Produces server instances for topology construction.
pub trait ServerFactory: Send + Sync {
    fn create(
        &self,
        accept_loop: &EventLoop,
        address: SocketAddr,
        name: &str,
        reuse_port: bool,
    ) -> Result<Box<dyn ServerInstance>, ServerError>;
}

/// Factory for real TCP servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpServerFactory;

impl ServerFactory for TcpServerFactory {
    fn create(
        &self,
        accept_loop: &EventLoop,
        address: SocketAddr,
        name: &str,
        reuse_port: bool,
    ) -> Result<Box<dyn ServerInstance>, ServerError> {
        Ok(Box::new(TcpServer::bind(accept_loop, address, name, reuse_port)?))
    }
}

/// A TCP listener accepting on one event loop.
pub struct TcpServer {
    name: String,
    address: SocketAddr,
    accept_loop: EventLoop,
    io_loops: Vec<EventLoop>,
    socket: Mutex<Option<Socket>>,
    callbacks: ListenerCallbacks,
    tls: Option<Arc<ReloadableTls>>,
    shutdown: watch::Sender<bool>,
}

impl TcpServer {
    /// Create and bind the socket. Listening starts with [`ServerInstance::start`].
    pub fn bind(
        accept_loop: &EventLoop,
        address: SocketAddr,
        name: &str,
        reuse_port: bool,
    ) -> Result<Self, ServerError> {
        let socket = bind_socket(address, reuse_port)
            .map_err(|source| ServerError::Bind { address, source })?;
        let bound = socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
            .unwrap_or(address);

        tracing::debug!(
            server = %name,
            address = %bound,
            loop_name = %accept_loop.name(),
            reuse_port,
            "Listener bound"
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            name: name.to_string(),
            address: bound,
            accept_loop: accept_loop.clone(),
            io_loops: Vec::new(),
            socket: Mutex::new(Some(socket)),
            callbacks: ListenerCallbacks::default(),
            tls: None,
            shutdown,
        })
    }
}

impl ServerInstance for TcpServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> SocketAddr {
        self.address
    }

    fn accept_loop(&self) -> &EventLoop {
        &self.accept_loop
    }

    fn io_loops(&self) -> &[EventLoop] {
        &self.io_loops
    }

    fn set_io_loops(&mut self, loops: Vec<EventLoop>) {
        self.io_loops = loops;
    }

    fn apply_callbacks(&mut self, callbacks: &ListenerCallbacks) {
        self.callbacks = callbacks.clone();
    }

    fn enable_tls(&mut self, policy: TlsPolicy) -> Result<(), TlsError> {
        self.tls = Some(Arc::new(ReloadableTls::new(policy)?));
        Ok(())
    }

    fn tls_policy(&self) -> Option<&TlsPolicy> {
        self.tls.as_deref().map(ReloadableTls::policy)
    }

    fn start(&self) -> Result<(), ServerError> {
        if *self.shutdown.borrow() {
            return Err(ServerError::Stopped(self.name.clone()));
        }
        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ServerError::AlreadyStarted(self.name.clone()))?;

        self.callbacks.before_listen(SockRef::from(&socket));
        socket.listen(LISTEN_BACKLOG).map_err(|source| ServerError::Listen {
            address: self.address,
            source,
        })?;

        let std_listener: std::net::TcpListener = socket.into();
        let dispatcher = Arc::new(Dispatcher {
            name: self.name.clone(),
            local_addr: self.address,
            accept_loop: self.accept_loop.clone(),
            io_loops: self.io_loops.clone(),
            next_loop: AtomicUsize::new(0),
            callbacks: self.callbacks.clone(),
            tls: self.tls.clone(),
        });
        let shutdown_rx = self.shutdown.subscribe();

        self.accept_loop
            .spawn(accept_loop(std_listener, dispatcher, shutdown_rx));

        tracing::info!(
            server = %self.name,
            address = %self.address,
            tls = self.tls.is_some(),
            io_loops = self.io_loops.len(),
            "Listening"
        );
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
        // Never-started sockets are closed here.
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!(server = %self.name, address = %self.address, "Stop requested");
    }

    fn reload_tls(&self) -> Result<(), TlsError> {
        match &self.tls {
            Some(tls) => tls.reload(),
            None => Ok(()),
        }
    }
}

/// State shared by the accept task and the per-connection tasks it spawns.
struct Dispatcher {
    name: String,
    local_addr: SocketAddr,
    accept_loop: EventLoop,
    io_loops: Vec<EventLoop>,
    next_loop: AtomicUsize,
    callbacks: ListenerCallbacks,
    tls: Option<Arc<ReloadableTls>>,
}

impl Dispatcher {
    fn next_io_loop(&self) -> Option<&EventLoop> {
        if self.io_loops.is_empty() {
            return None;
        }
        let index = self.next_loop.fetch_add(1, Ordering::Relaxed) % self.io_loops.len();
        self.io_loops.get(index)
    }

    /// Route an accepted stream to the loop that will own it.
    fn dispatch(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        self.callbacks.after_accept(SockRef::from(&stream));

        let Some(io_loop) = self.next_io_loop() else {
            let this = Arc::clone(self);
            let loop_name = self.accept_loop.name().to_string();
            tokio::spawn(async move { this.establish(stream, peer, &loop_name).await });
            return;
        };

        // Deregister from the accept loop's reactor before moving threads.
        let std_stream = match stream.into_std() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    server = %self.name,
                    peer_addr = %peer,
                    error = %e,
                    "Failed to detach accepted stream"
                );
                return;
            }
        };
        let this = Arc::clone(self);
        let loop_name = io_loop.name().to_string();
        io_loop.spawn(async move {
            match TcpStream::from_std(std_stream) {
                Ok(stream) => this.establish(stream, peer, &loop_name).await,
                Err(e) => {
                    tracing::warn!(
                        server = %this.name,
                        peer_addr = %peer,
                        error = %e,
                        "Failed to register stream on I/O loop"
                    );
                }
            }
        });
    }

    async fn establish(&self, stream: TcpStream, peer: SocketAddr, loop_name: &str) {
        let stream = match &self.tls {
            Some(tls) => match tls.acceptor().accept(stream).await {
                Ok(tls_stream) => Stream::Tls(Box::new(tls_stream)),
                Err(e) => {
                    tracing::debug!(
                        server = %self.name,
                        peer_addr = %peer,
                        error = %e,
                        "TLS handshake failed"
                    );
                    return;
                }
            },
            None => Stream::Plain(stream),
        };

        let connection = Connection::new(peer, self.local_addr, loop_name, stream);
        tracing::trace!(
            server = %self.name,
            connection_id = %connection.id(),
            peer_addr = %peer,
            loop_name = %loop_name,
            "Connection established"
        );
        self.callbacks.on_connection(connection);
    }
}

async fn accept_loop(
    std_listener: std::net::TcpListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::from_std(std_listener) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(server = %dispatcher.name, error = %e, "Failed to register listener");
            return;
        }
    };

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => dispatcher.dispatch(stream, peer),
                Err(e) => {
                    tracing::warn!(server = %dispatcher.name, error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(server = %dispatcher.name, address = %dispatcher.local_addr, "Listener stopped");
}
