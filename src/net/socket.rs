//! Listening socket construction and the startup bind probe.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use socket2::{Domain, Protocol, Socket, Type};

use super::lock::{LockError, PortLock};

/// Backlog passed to `listen`.
pub const LISTEN_BACKLOG: i32 = 1024;

/// Parse a numeric listen address.
///
/// A literal containing `':'` is IPv6, anything else IPv4. Hostnames,
/// `localhost` included, are rejected.
pub fn parse_listen_address(address: &str, port: u16) -> Option<SocketAddr> {
    let ip = if address.contains(':') {
        address.parse::<Ipv6Addr>().ok().map(IpAddr::V6)
    } else {
        address.parse::<Ipv4Addr>().ok().map(IpAddr::V4)
    }?;
    Some(SocketAddr::new(ip, port))
}

/// Create a TCP socket bound to `addr` but not yet listening.
///
/// `reuse_port` sets SO_REUSEPORT where the platform has it, letting every
/// worker loop bind its own socket to the same address.
pub fn bind_socket(addr: SocketAddr, reuse_port: bool) -> io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }

    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    {
        if reuse_port {
            socket.set_reuse_port(true)?;
        }
    }
    #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
    {
        if reuse_port {
            tracing::warn!(address = %addr, "SO_REUSEPORT unavailable on this platform");
        }
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

/// Error from the bind probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("address {address} is already in use: {source}")]
    InUse {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Throwaway bind to `addr` under the port lock.
///
/// Surfaces "address in use" deterministically before worker loops start
/// binding concurrently. The lock is held only for the bind itself.
pub fn probe_bind(addr: SocketAddr, lock_path: &Path) -> Result<(), ProbeError> {
    let _lock = PortLock::acquire(lock_path)?;
    let probe = bind_socket(addr, false)
        .and_then(|socket| socket.listen(1).map(|()| socket))
        .map_err(|source| ProbeError::InUse {
            address: addr,
            source,
        })?;
    drop(probe);
    tracing::debug!(address = %addr, "Bind probe succeeded");
    Ok(())
}
