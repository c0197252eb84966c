//! Listener management subsystem.
//!
//! # Data Flow
//! ```text
//! add_listener (store.rs, append-only)
//!     → create_listeners (topology.rs)
//!         → per-loop: probe (net::socket + net::lock) → instance per loop × spec
//!         → dedicated: listening thread → instance per spec, fanned out to workers
//!         → ssl.rs resolves TLS per spec
//!     → registry.rs holds the instances
//!     → start / stop / reload applied uniformly
//! ```
//!
//! # Design Decisions
//! - Construction is all-or-nothing; errors are returned, the caller exits
//! - Callbacks are an immutable value passed to construction
//! - Lifecycle is single-shot: stop is final

pub mod error;
pub mod manager;
pub mod registry;
pub mod ssl;
pub mod store;
pub mod topology;

pub use error::ListenerError;
pub use manager::{LifecycleState, ListenerManager};
pub use registry::ReloadReport;
pub use ssl::GlobalTls;
pub use store::ListenerSpec;
pub use topology::{Capabilities, TopologyOptions, TopologyStrategy};
