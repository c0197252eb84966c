//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//! - Merge certificate watcher reload requests into the same stream
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a TLS reload, not shutdown

use std::io;

use tokio::sync::mpsc;

use crate::config::watcher::ReloadRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Shutdown,
    Reload,
}

/// Stream of control events for the main loop.
///
/// Handlers are registered once in [`ControlEvents::new`], so signals that
/// arrive between two calls to [`ControlEvents::recv`] are not lost.
pub struct ControlEvents {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    reloads: Option<mpsc::UnboundedReceiver<ReloadRequest>>,
}

impl ControlEvents {
    /// Register signal handlers. Must be called inside a Tokio runtime.
    #[cfg(unix)]
    pub fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
            reloads: None,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> io::Result<Self> {
        Ok(Self { reloads: None })
    }

    /// Also deliver reload requests from a certificate watcher.
    pub fn with_reloads(mut self, reloads: mpsc::UnboundedReceiver<ReloadRequest>) -> Self {
        self.reloads = Some(reloads);
        self
    }

    /// Wait for the next control event.
    pub async fn recv(&mut self) -> ControlEvent {
        loop {
            let reloads = &mut self.reloads;
            let reload = async move {
                match reloads.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            };

            #[cfg(unix)]
            let event = {
                // Distinct locals so each branch borrows only its own field.
                let terminate = &mut self.terminate;
                let interrupt = &mut self.interrupt;
                let hangup = &mut self.hangup;
                tokio::select! {
                    _ = terminate.recv() => {
                        tracing::info!("SIGTERM received");
                        Some(ControlEvent::Shutdown)
                    }
                    _ = interrupt.recv() => {
                        tracing::info!("SIGINT received");
                        Some(ControlEvent::Shutdown)
                    }
                    _ = hangup.recv() => {
                        tracing::info!("SIGHUP received");
                        Some(ControlEvent::Reload)
                    }
                    request = reload => request.map(|r| {
                        tracing::debug!(path = %r.path.display(), "reload requested by watcher");
                        ControlEvent::Reload
                    }),
                }
            };

            #[cfg(not(unix))]
            let event = tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        tracing::error!(error = %e, "ctrl-c handler failed");
                    }
                    Some(ControlEvent::Shutdown)
                }
                request = reload => request.map(|_| ControlEvent::Reload),
            };

            match event {
                Some(event) => return event,
                None => {
                    tracing::warn!("certificate watcher stopped; reloads now only on SIGHUP");
                    self.reloads = None;
                }
            }
        }
    }
}
