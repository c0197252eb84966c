//! Listener topology core: declared listeners, worker event loops and the
//! sockets that connect them.

pub mod config;
pub mod lifecycle;
pub mod listener;
pub mod net;
pub mod observability;

pub use config::AppConfig;
pub use listener::{GlobalTls, ListenerError, ListenerManager, ListenerSpec, TopologyOptions};
pub use net::{EventLoop, EventLoopThreadPool, ListenerCallbacks};
