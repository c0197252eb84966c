//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (address, loop_name, listener)
//!
//! Consumers:
//!     → logging.rs (stderr, text or JSON)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Filter resolution: CLI flag, then RUST_LOG, then config
//! - Initialization is fallible and happens once, in the binary

pub mod logging;
