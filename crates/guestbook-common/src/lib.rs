//! # Guestbook Common
//!
//! Shared error type, logging setup and worker configuration for the
//! guestbook offline cache.
//!
//! ## Features
//!
//! - Unified error type for configuration and I/O failures
//! - Logging configuration and setup
//! - Worker configuration with the literal cache names and asset lists

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{NetworkConfig, WorkerConfig};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for the shared layer.
#[derive(Error, Debug)]
pub enum GuestbookError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl GuestbookError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            GuestbookError::Config { .. } => "config",
            GuestbookError::Io(_) => "io",
            GuestbookError::Json(_) => "json",
            GuestbookError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for shared operations.
pub type Result<T> = std::result::Result<T, GuestbookError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_categories() {
        assert_eq!(GuestbookError::config("bad").category(), "config");
        assert_eq!(
            GuestbookError::invalid_argument("--origin").category(),
            "invalid_argument"
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(GuestbookError::from(io).category(), "io");
    }

    #[test]
    fn test_config_error_keeps_source() {
        let parse = url::Url::parse("not a url").unwrap_err();
        let err = GuestbookError::config_with_source("origin", parse);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Config error: origin");
    }
}
