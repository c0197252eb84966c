//! Listener topology construction.
//!
//! # Responsibilities
//! - Choose between per-loop sockets and a single dedicated listening thread
//! - Parse literal addresses, probe for conflicts, resolve TLS per listener
//! - Build every server instance or none at all
//!
//! # Design Decisions
//! - Strategy is picked from an injected capability flag, not `cfg!`, so both
//!   variants run in one test harness
//! - Instances are collected locally and only committed on full success

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::net::lock::DEFAULT_LOCK_PATH;
use crate::net::socket::{parse_listen_address, probe_bind, ProbeError};
use crate::net::{EventLoop, EventLoopThread, ListenerCallbacks, ServerFactory, ServerInstance};

use super::error::ListenerError;
use super::ssl::{resolve_policy, GlobalTls};
use super::store::ListenerSpec;

/// Name of the dedicated accept thread.
pub const LISTENING_LOOP_NAME: &str = "listening-loop";

/// What the platform and build can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Independent sockets may bind the same address/port across threads
    /// with kernel load-balanced accept.
    pub reuse_port: bool,
    /// TLS can be enabled at all.
    pub tls: bool,
}

impl Capabilities {
    /// Capabilities of the running platform.
    pub fn detect() -> Self {
        Self {
            reuse_port: cfg!(target_os = "linux"),
            tls: true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// How listeners are realized against the worker loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStrategy {
    /// One socket per (worker loop, spec), all sharing the port.
    PerLoop,
    /// One socket per spec on a dedicated thread that fans accepted
    /// connections out to the worker loops.
    DedicatedThread,
}

impl TopologyStrategy {
    pub fn for_capabilities(capabilities: &Capabilities) -> Self {
        if capabilities.reuse_port {
            TopologyStrategy::PerLoop
        } else {
            TopologyStrategy::DedicatedThread
        }
    }
}

impl std::fmt::Display for TopologyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyStrategy::PerLoop => write!(f, "per-loop"),
            TopologyStrategy::DedicatedThread => write!(f, "dedicated-thread"),
        }
    }
}

/// Inputs fixed before any listener is realized.
#[derive(Debug, Clone)]
pub struct TopologyOptions {
    pub capabilities: Capabilities,
    /// Port sharing with other processes is allowed. When false the
    /// per-loop strategy probes each address before binding loop 0.
    pub share_port: bool,
    /// Lock file serializing the bind probe across processes.
    pub lock_path: PathBuf,
    /// Forces a strategy instead of deriving it from `capabilities`.
    pub strategy: Option<TopologyStrategy>,
}

impl TopologyOptions {
    pub fn strategy(&self) -> TopologyStrategy {
        self.strategy
            .unwrap_or_else(|| TopologyStrategy::for_capabilities(&self.capabilities))
    }
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::detect(),
            share_port: false,
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            strategy: None,
        }
    }
}

/// Everything topology construction reads.
pub(crate) struct RealizeContext<'a> {
    pub options: &'a TopologyOptions,
    pub factory: &'a Arc<dyn ServerFactory>,
    pub global_tls: &'a GlobalTls,
    pub worker_loops: &'a [EventLoop],
    pub callbacks: &'a ListenerCallbacks,
}

/// A fully constructed, not yet started topology.
pub(crate) struct Realized {
    pub servers: Vec<Box<dyn ServerInstance>>,
    pub listening_thread: Option<EventLoopThread>,
}

pub(crate) fn realize(
    specs: &[ListenerSpec],
    ctx: &RealizeContext<'_>,
) -> Result<Realized, ListenerError> {
    let strategy = ctx.options.strategy();
    tracing::debug!(
        strategy = %strategy,
        worker_loops = ctx.worker_loops.len(),
        listeners = specs.len(),
        "Realizing listener topology"
    );

    match strategy {
        TopologyStrategy::PerLoop => realize_per_loop(specs, ctx),
        TopologyStrategy::DedicatedThread => realize_dedicated(specs, ctx),
    }
}

/// One instance per (worker loop, spec).
///
/// Port 0 is passed through as-is, so each loop's socket gets its own
/// ephemeral port; a warning is logged when that splits a listener.
fn realize_per_loop(
    specs: &[ListenerSpec],
    ctx: &RealizeContext<'_>,
) -> Result<Realized, ListenerError> {
    if ctx.worker_loops.is_empty() && !specs.is_empty() {
        tracing::warn!("No worker loops available; per-loop topology has no instances");
    }
    if ctx.worker_loops.len() > 1 {
        for spec in specs.iter().filter(|s| s.port == 0) {
            tracing::warn!(
                listener = %spec,
                worker_loops = ctx.worker_loops.len(),
                "Port 0 under the per-loop topology binds a different port on every loop"
            );
        }
    }

    let mut servers = Vec::with_capacity(ctx.worker_loops.len() * specs.len());
    for (index, worker) in ctx.worker_loops.iter().enumerate() {
        for spec in specs {
            let address = listen_address(spec)?;
            if index == 0 && !ctx.options.share_port {
                probe_bind(address, &ctx.options.lock_path).map_err(|e| match e {
                    ProbeError::Lock(e) => ListenerError::Lock(e),
                    ProbeError::InUse { address, source } => {
                        ListenerError::AddressInUse { address, source }
                    }
                })?;
            }
            let server = build_server(spec, worker, address, true, ctx)?;
            servers.push(server);
        }
    }

    Ok(Realized {
        servers,
        listening_thread: None,
    })
}

fn realize_dedicated(
    specs: &[ListenerSpec],
    ctx: &RealizeContext<'_>,
) -> Result<Realized, ListenerError> {
    if specs.is_empty() {
        return Ok(Realized {
            servers: Vec::new(),
            listening_thread: None,
        });
    }

    // Dropping the thread on an error path quits and joins it.
    let thread =
        EventLoopThread::spawn(LISTENING_LOOP_NAME).map_err(ListenerError::ListeningThread)?;
    let accept_loop = thread.event_loop().clone();

    let mut servers = Vec::with_capacity(specs.len());
    for spec in specs {
        let address = listen_address(spec)?;
        let mut server = build_server(spec, &accept_loop, address, false, ctx)?;
        server.set_io_loops(ctx.worker_loops.to_vec());
        servers.push(server);
    }

    Ok(Realized {
        servers,
        listening_thread: Some(thread),
    })
}

fn listen_address(spec: &ListenerSpec) -> Result<SocketAddr, ListenerError> {
    parse_listen_address(&spec.address, spec.port).ok_or_else(|| {
        tracing::error!(
            address = %spec.address,
            "Failed to parse IP address (FQDN/domain names/hostnames are not supported, including 'localhost')"
        );
        ListenerError::InvalidAddress(spec.address.clone())
    })
}

fn build_server(
    spec: &ListenerSpec,
    accept_loop: &EventLoop,
    address: SocketAddr,
    reuse_port: bool,
    ctx: &RealizeContext<'_>,
) -> Result<Box<dyn ServerInstance>, ListenerError> {
    let name = format!("listener@{}", accept_loop.name());
    let mut server = ctx.factory.create(accept_loop, address, &name, reuse_port)?;
    server.apply_callbacks(ctx.callbacks);

    if spec.use_ssl && ctx.options.capabilities.tls {
        let policy = resolve_policy(spec, ctx.global_tls)?;
        server
            .enable_tls(policy)
            .map_err(|source| ListenerError::Tls {
                listener: spec.to_string(),
                source,
            })?;
    }

    Ok(server)
}
