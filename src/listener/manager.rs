//! The listener manager: declare, realize, start, stop, reload.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::net::{EventLoop, ListenerCallbacks, ServerFactory, ServerInstance, TcpServerFactory};

use super::error::ListenerError;
use super::registry::{ReloadReport, ServerRegistry};
use super::ssl::GlobalTls;
use super::store::{ListenerSpec, ListenerStore};
use super::topology::{realize, RealizeContext, TopologyOptions, TopologyStrategy};

/// Lifecycle position. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting declarations.
    Declaring,
    /// Topology built, nothing accepting yet.
    Realized,
    Listening,
    Stopped,
}

/// Owns the declared listeners and the topology realized from them.
pub struct ListenerManager {
    options: TopologyOptions,
    factory: Arc<dyn ServerFactory>,
    store: ListenerStore,
    registry: ServerRegistry,
    state: LifecycleState,
}

impl ListenerManager {
    /// Manager producing real TCP servers.
    pub fn new(options: TopologyOptions) -> Self {
        Self::with_factory(options, Arc::new(TcpServerFactory))
    }

    pub fn with_factory(options: TopologyOptions, factory: Arc<dyn ServerFactory>) -> Self {
        Self {
            options,
            factory,
            store: ListenerStore::new(),
            registry: ServerRegistry::default(),
            state: LifecycleState::Declaring,
        }
    }

    /// Declare a listener. Only allowed before [`Self::create_listeners`].
    ///
    /// Requesting TLS when the build cannot provide it is logged and the
    /// listener is kept; it will be realized without encryption.
    pub fn add_listener(&mut self, spec: ListenerSpec) -> Result<(), ListenerError> {
        if spec.use_ssl && !self.options.capabilities.tls {
            tracing::error!(
                listener = %spec,
                "Can't use SSL without TLS support in this build; listener will serve plain TCP"
            );
        }
        self.store.push(spec)
    }

    pub fn specs(&self) -> &[ListenerSpec] {
        self.store.specs()
    }

    /// Bound addresses of every realized instance, in realization order.
    pub fn get_listeners(&self) -> Vec<SocketAddr> {
        self.registry.addresses()
    }

    pub fn strategy(&self) -> TopologyStrategy {
        self.options.strategy()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn servers(&self) -> impl Iterator<Item = &dyn ServerInstance> {
        self.registry.servers()
    }

    pub fn server_count(&self) -> usize {
        self.registry.len()
    }

    pub fn has_listening_thread(&self) -> bool {
        self.registry.listening_thread().is_some()
    }

    /// The dedicated listening loop, when the dedicated-thread strategy is active.
    pub fn listening_loop(&self) -> Option<&EventLoop> {
        self.registry.listening_thread().map(|t| t.event_loop())
    }

    /// Realize the declared listeners against `worker_loops`. Call once.
    ///
    /// On error nothing is kept: instances built so far are dropped before
    /// they ever listen and any dedicated thread is joined. The manager is
    /// left `Stopped` and the caller is expected to treat the error as fatal.
    pub fn create_listeners(
        &mut self,
        global_tls: &GlobalTls,
        worker_loops: &[EventLoop],
        callbacks: ListenerCallbacks,
    ) -> Result<(), ListenerError> {
        if self.state != LifecycleState::Declaring {
            return Err(ListenerError::InvalidState("listeners were already created"));
        }
        self.store.freeze();

        let ctx = RealizeContext {
            options: &self.options,
            factory: &self.factory,
            global_tls,
            worker_loops,
            callbacks: &callbacks,
        };
        let realized = match realize(self.store.specs(), &ctx) {
            Ok(realized) => realized,
            Err(e) => {
                self.state = LifecycleState::Stopped;
                return Err(e);
            }
        };
        self.registry = ServerRegistry::from_realized(realized);
        self.state = LifecycleState::Realized;

        tracing::info!(
            strategy = %self.strategy(),
            instances = self.registry.len(),
            dedicated_thread = self.has_listening_thread(),
            "Listener topology created"
        );
        Ok(())
    }

    /// Start every realized instance. Single-shot: a stopped manager
    /// cannot be restarted.
    ///
    /// If any instance fails to start, every instance (including those
    /// already accepting) is stopped and the manager ends up `Stopped`.
    pub fn start_listening(&mut self) -> Result<(), ListenerError> {
        match self.state {
            LifecycleState::Realized => {}
            LifecycleState::Declaring => {
                return Err(ListenerError::InvalidState("listeners have not been created"))
            }
            LifecycleState::Listening => {
                return Err(ListenerError::InvalidState("already listening"))
            }
            LifecycleState::Stopped => {
                return Err(ListenerError::InvalidState("listeners cannot be restarted after stop"))
            }
        }
        self.state = LifecycleState::Listening;
        if let Err(e) = self.registry.start_all() {
            tracing::error!(
                error = %e,
                "Failed to start listeners; stopping those already started"
            );
            self.stop_listening();
            return Err(e);
        }
        Ok(())
    }

    /// Stop every instance, then the dedicated listening loop if present.
    ///
    /// Must be called from a thread other than the listening loop's.
    /// Repeated calls are no-ops.
    pub fn stop_listening(&mut self) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        self.registry.stop_all();
        self.state = LifecycleState::Stopped;
        tracing::info!("Listeners stopped");
    }

    /// Ask every TLS instance to re-read its cert and key.
    pub fn reload_ssl_files(&self) -> ReloadReport {
        let report = self.registry.reload_tls();
        tracing::info!(
            reloaded = report.reloaded.len(),
            failed = report.failed.len(),
            "TLS reload finished"
        );
        report
    }
}

impl Drop for ListenerManager {
    fn drop(&mut self) {
        if matches!(self.state, LifecycleState::Realized | LifecycleState::Listening) {
            self.stop_listening();
        }
    }
}

impl std::fmt::Debug for ListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerManager")
            .field("options", &self.options)
            .field("specs", &self.store.specs())
            .field("registry", &self.registry)
            .field("state", &self.state)
            .finish()
    }
}
