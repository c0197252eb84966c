//! Realized server instances and their start/stop/reload orchestration.

use std::net::SocketAddr;

use crate::net::{EventLoopThread, ServerInstance, TlsError};

use super::error::ListenerError;
use super::topology::Realized;

/// Outcome of a certificate reload across all instances.
#[derive(Debug, Default)]
pub struct ReloadReport {
    /// Names of instances that reloaded successfully.
    pub reloaded: Vec<String>,
    /// Instances whose reload failed; they keep serving the previous config.
    pub failed: Vec<(String, TlsError)>,
}

impl ReloadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Authoritative owner of every realized instance.
#[derive(Default)]
pub struct ServerRegistry {
    servers: Vec<Box<dyn ServerInstance>>,
    listening_thread: Option<EventLoopThread>,
}

impl ServerRegistry {
    pub(crate) fn from_realized(realized: Realized) -> Self {
        Self {
            servers: realized.servers,
            listening_thread: realized.listening_thread,
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn servers(&self) -> impl Iterator<Item = &dyn ServerInstance> {
        self.servers.iter().map(|s| s.as_ref())
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.servers.iter().map(|s| s.address()).collect()
    }

    pub fn listening_thread(&self) -> Option<&EventLoopThread> {
        self.listening_thread.as_ref()
    }

    /// Start every instance. Each begins accepting on its own loop.
    ///
    /// Stops at the first failure; instances started before it keep
    /// accepting until [`Self::stop_all`].
    pub fn start_all(&self) -> Result<(), ListenerError> {
        for server in &self.servers {
            server.start()?;
        }
        Ok(())
    }

    /// Stop every instance, then shut the dedicated listening loop down.
    ///
    /// Must not be called from the dedicated loop's own thread: joining it
    /// from there would deadlock.
    pub fn stop_all(&mut self) {
        for server in &self.servers {
            server.stop();
        }
        if let Some(mut thread) = self.listening_thread.take() {
            debug_assert!(
                !thread.event_loop().is_in_loop_thread(),
                "stop_listening called from the listening loop"
            );
            thread.quit();
            thread.wait();
            tracing::info!("Listening loop stopped");
        }
    }

    /// Reload certificates on every TLS instance, isolating failures.
    pub fn reload_tls(&self) -> ReloadReport {
        let mut report = ReloadReport::default();
        for server in self.servers.iter().filter(|s| s.tls_enabled()) {
            match server.reload_tls() {
                Ok(()) => report.reloaded.push(server.name().to_string()),
                Err(e) => {
                    tracing::error!(
                        server = %server.name(),
                        address = %server.address(),
                        error = %e,
                        "Failed to reload TLS certificates"
                    );
                    report.failed.push((server.name().to_string(), e));
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.addresses())
            .field("listening_thread", &self.listening_thread.is_some())
            .finish()
    }
}
