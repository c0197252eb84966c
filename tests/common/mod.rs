//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use listener_topology::listener::{Capabilities, TopologyOptions, TopologyStrategy};
use listener_topology::net::{
    EventLoop, ListenerCallbacks, ServerError, ServerFactory, ServerInstance, TlsError, TlsPolicy,
};

/// Calls observed across every instance a [`RecordingFactory`] produced.
#[derive(Debug, Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub reloads: AtomicUsize,
    /// Stops that found the accept loop still able to run tasks.
    pub stops_on_live_loop: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn stops_on_live_loop(&self) -> usize {
        self.stops_on_live_loop.load(Ordering::SeqCst)
    }
}

/// Factory producing [`MockServer`]s that never touch the network.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    pub counters: Arc<Counters>,
    failing_cert: Option<PathBuf>,
    failing_start_port: Option<u16>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Instances whose certificate is `cert` fail on reload.
    pub fn failing_reload_for(cert: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            failing_cert: Some(cert.into()),
            ..Self::default()
        })
    }

    /// Instances listening on `port` fail to start.
    pub fn failing_start_on(port: u16) -> Arc<Self> {
        Arc::new(Self {
            failing_start_port: Some(port),
            ..Self::default()
        })
    }
}

impl ServerFactory for RecordingFactory {
    fn create(
        &self,
        accept_loop: &EventLoop,
        address: SocketAddr,
        name: &str,
        reuse_port: bool,
    ) -> Result<Box<dyn ServerInstance>, ServerError> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockServer {
            name: name.to_string(),
            address,
            reuse_port,
            accept_loop: accept_loop.clone(),
            io_loops: Vec::new(),
            has_connection_callback: false,
            tls: None,
            failing_cert: self.failing_cert.clone(),
            failing_start_port: self.failing_start_port,
            counters: Arc::clone(&self.counters),
        }))
    }
}

pub struct MockServer {
    name: String,
    address: SocketAddr,
    pub reuse_port: bool,
    accept_loop: EventLoop,
    io_loops: Vec<EventLoop>,
    has_connection_callback: bool,
    tls: Option<TlsPolicy>,
    failing_cert: Option<PathBuf>,
    failing_start_port: Option<u16>,
    counters: Arc<Counters>,
}

impl MockServer {
    /// Whether a task spawned on the accept loop runs to completion.
    fn accept_loop_is_live(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        self.accept_loop.spawn(async move {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(2)).is_ok()
    }
}

impl ServerInstance for MockServer {
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
        self.has_connection_callback = callbacks.has_connection();
    }

    fn enable_tls(&mut self, policy: TlsPolicy) -> Result<(), TlsError> {
        self.tls = Some(policy);
        Ok(())
    }

    fn tls_policy(&self) -> Option<&TlsPolicy> {
        self.tls.as_ref()
    }

    fn start(&self) -> Result<(), ServerError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        if self.failing_start_port == Some(self.address.port()) {
            return Err(ServerError::Listen {
                address: self.address,
                source: std::io::ErrorKind::AddrInUse.into(),
            });
        }
        Ok(())
    }

    fn stop(&self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        if self.accept_loop_is_live() {
            self.counters.stops_on_live_loop.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reload_tls(&self) -> Result<(), TlsError> {
        self.counters.reloads.fetch_add(1, Ordering::SeqCst);
        match (&self.tls, &self.failing_cert) {
            (Some(policy), Some(bad)) if policy.cert_path() == bad.as_path() => {
                Err(TlsError::CertNotFound(bad.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Options that force `strategy`, skip the bind probe and keep the lock
/// file inside `lock_dir`.
pub fn options(strategy: TopologyStrategy, lock_dir: &Path) -> TopologyOptions {
    TopologyOptions {
        capabilities: Capabilities {
            reuse_port: strategy == TopologyStrategy::PerLoop,
            tls: true,
        },
        share_port: true,
        lock_path: lock_dir.join("listener-topology.lock"),
        strategy: Some(strategy),
    }
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
