//! Callbacks shared by every realized server instance.

use std::sync::Arc;

use socket2::SockRef;

use super::connection::Connection;

/// Socket-option hook, applied to a listening or accepted socket.
pub type SockOptCallback = Arc<dyn for<'a> Fn(SockRef<'a>) + Send + Sync>;

/// Receives each established connection on the loop that owns it.
pub type ConnectionCallback = Arc<dyn Fn(Connection) + Send + Sync>;

/// Immutable callback set handed to topology construction.
///
/// Every hook is optional; an unset hook is a no-op (an unhandled
/// connection is simply closed).
#[derive(Clone, Default)]
pub struct ListenerCallbacks {
    before_listen: Option<SockOptCallback>,
    after_accept: Option<SockOptCallback>,
    on_connection: Option<ConnectionCallback>,
}

impl ListenerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs on each listening socket right before `listen`.
    pub fn with_before_listen<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(SockRef<'a>) + Send + Sync + 'static,
    {
        self.before_listen = Some(Arc::new(f));
        self
    }

    /// Runs on each accepted socket before it is handed to a worker loop.
    pub fn with_after_accept<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(SockRef<'a>) + Send + Sync + 'static,
    {
        self.after_accept = Some(Arc::new(f));
        self
    }

    pub fn with_connection<F>(mut self, f: F) -> Self
    where
        F: Fn(Connection) + Send + Sync + 'static,
    {
        self.on_connection = Some(Arc::new(f));
        self
    }

    pub fn before_listen(&self, socket: SockRef<'_>) {
        if let Some(cb) = &self.before_listen {
            cb(socket);
        }
    }

    pub fn after_accept(&self, socket: SockRef<'_>) {
        if let Some(cb) = &self.after_accept {
            cb(socket);
        }
    }

    pub fn on_connection(&self, connection: Connection) {
        match &self.on_connection {
            Some(cb) => cb(connection),
            None => {
                tracing::trace!(
                    connection_id = %connection.id(),
                    "No connection callback set, closing"
                );
            }
        }
    }

    pub fn has_before_listen(&self) -> bool {
        self.before_listen.is_some()
    }

    pub fn has_after_accept(&self) -> bool {
        self.after_accept.is_some()
    }

    pub fn has_connection(&self) -> bool {
        self.on_connection.is_some()
    }
}

impl std::fmt::Debug for ListenerCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerCallbacks")
            .field("before_listen", &self.before_listen.is_some())
            .field("after_accept", &self.after_accept.is_some())
            .field("on_connection", &self.on_connection.is_some())
            .finish()
    }
}
