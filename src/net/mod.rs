//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Topology construction
//!     → socket.rs (parse literal address, bind probe under lock.rs)
//!     → server.rs (bind socket on an accept loop)
//!     → tls.rs (optional: load cert/key into a reloadable config)
//!
//! Accepting (per server, on its accept loop):
//!     accept → after-accept hook → pick I/O loop (round-robin)
//!     → TLS handshake (optional) → connection.rs → connection callback
//! ```
//!
//! # Design Decisions
//! - Sockets bind at construction so conflicts surface before anything starts
//! - Each event loop is a current-thread Tokio runtime on its own OS thread
//! - TLS config is swapped atomically on reload; in-flight handshakes keep the old one

pub mod callbacks;
pub mod connection;
pub mod event_loop;
pub mod lock;
pub mod server;
pub mod socket;
pub mod tls;

pub use callbacks::ListenerCallbacks;
pub use connection::{Connection, ConnectionId, Stream};
pub use event_loop::{EventLoop, EventLoopThread, EventLoopThreadPool};
pub use server::{ServerError, ServerFactory, ServerInstance, TcpServer, TcpServerFactory};
pub use tls::{TlsError, TlsPolicy};
