//! Error type for listener management.

use std::net::SocketAddr;

use crate::net::lock::LockError;
use crate::net::{ServerError, TlsError};

/// Errors raised while declaring, realizing or driving listeners.
///
/// Every variant except `InvalidState` is a configuration-time failure:
/// the caller must not start a partially realized topology.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Listeners are frozen once realized; cannot add {0}")]
    Frozen(String),

    #[error(
        "Failed to parse IP address '{0}' (hostnames, including 'localhost', are not supported)"
    )]
    InvalidAddress(String),

    #[error("Address {address} is already in use: {source}")]
    AddressInUse {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Port lock unavailable: {0}")]
    Lock(#[from] LockError),

    #[error("You can't use https without cert file or key file (listener {0})")]
    MissingTlsMaterial(String),

    #[error("TLS setup failed for {listener}: {source}")]
    Tls {
        listener: String,
        #[source]
        source: TlsError,
    },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Failed to start listening thread: {0}")]
    ListeningThread(#[source] std::io::Error),

    #[error("Invalid lifecycle transition: {0}")]
    InvalidState(&'static str),
}
