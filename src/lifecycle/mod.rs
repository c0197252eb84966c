//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Init logging → Worker loops → Declare listeners
//!     → create_listeners → start_listening
//!
//! Control (signals.rs):
//!     SIGTERM/SIGINT → ControlEvent::Shutdown
//!     SIGHUP / cert file change → ControlEvent::Reload
//!
//! Shutdown:
//!     stop_listening → stop worker loops → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then loops, then listeners
//! - Listener lifecycle is single-shot; a stopped manager is not restarted
//! - Reload only swaps TLS material, never the listener set

pub mod signals;

pub use signals::{ControlEvent, ControlEvents};
