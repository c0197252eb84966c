//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Detect duplicate listener declarations
//! - Catch obviously empty values early
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Address literals and TLS material are checked at topology construction,
//!   not here, so the library enforces them for every caller

use std::collections::HashSet;

use crate::config::schema::AppConfig;

/// Upper bound on worker loops accepted from configuration.
pub const MAX_WORKER_THREADS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener #{index} has an empty address")]
    EmptyAddress { index: usize },

    #[error("listener {address}:{port} is declared more than once")]
    DuplicateListener { address: String, port: u16 },

    #[error("runtime.worker_threads = {0} exceeds {max}", max = MAX_WORKER_THREADS)]
    TooManyWorkers(usize),

    #[error("runtime.lock_path is empty")]
    EmptyLockPath,
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.runtime.worker_threads > MAX_WORKER_THREADS {
        errors.push(ValidationError::TooManyWorkers(config.runtime.worker_threads));
    }
    if config.runtime.lock_path.trim().is_empty() {
        errors.push(ValidationError::EmptyLockPath);
    }

    let mut seen = HashSet::new();
    for (index, listener) in config.listener.iter().enumerate() {
        if listener.address.trim().is_empty() {
            errors.push(ValidationError::EmptyAddress { index });
        }
        // Port 0 asks the kernel for a fresh port each time, so it never collides.
        if listener.port != 0 && !seen.insert((listener.address.as_str(), listener.port)) {
            errors.push(ValidationError::DuplicateListener {
                address: listener.address.clone(),
                port: listener.port,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
