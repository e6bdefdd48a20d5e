// Allow complex types where needed for handler registries and boxed futures
#![allow(clippy::type_complexity)]

pub mod analysis;
pub mod error;
pub mod logging;
pub mod prevention;
pub mod settings;

// Re-export the main entry points for convenience
pub use settings::SentinelConfig;
pub use error::{
    ErrorCategory, ErrorContext, ErrorType, Failure, ProcessingError, RecoveryManager, Severity,
};

use thiserror::Error;

/// Errors raised by the sentinel itself.
///
/// Failures in the monitored domain are never represented here; those are
/// classified into [`ProcessingError`]s. This enum covers the subsystem's own
/// I/O, persistence and outbound HTTP.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Request to {url} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Quarantine failed for {path}: {reason}")]
    Quarantine { path: String, reason: String },

    #[error("Insufficient disk space on {path}: {available} bytes available, {required} required")]
    InsufficientSpace {
        path: String,
        available: u64,
        required: u64,
    },

    #[error("Prevention action {action} failed: {reason}")]
    ActionFailed { action: String, reason: String },
}

pub type SentinelResult<T> = Result<T, SentinelError>;

#[cfg(test)]
mod lib_tests;
