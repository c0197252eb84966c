//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → listener specs, global TLS defaults, topology options
//!
//! While running:
//!     watcher.rs detects cert/key file changes
//!     → reload request
//!     → ListenerManager::reload_ssl_files
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; listeners cannot change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
pub use schema::ListenerConfig;
pub use schema::LogFormat;
pub use schema::TlsConfig;
