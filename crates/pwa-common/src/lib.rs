//! # PWA Common
//!
//! Shared error taxonomy, logging setup and configuration for the offline
//! caching engine.
//!
//! ## Features
//!
//! - Unified error type covering every failure class the engine knows about
//! - Logging configuration and setup
//! - Worker configuration (cache versioning, precache manifest, relay defaults)
//! - Result extension traits

use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{NotificationDefaults, SwConfig, VersionConfig, APP_SHELL_ROLE, RUNTIME_ROLE};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for the offline engine.
#[derive(Error, Debug)]
pub enum PwaError {
    /// Network unreachable, timed out or otherwise failed below HTTP.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A precache entry could not be fetched; the new version is not promoted.
    #[error("Install failed: {message}")]
    Install {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache store rejected an operation.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Push payload could not be decoded.
    #[error("Payload error: {0}")]
    Payload(String),

    /// Background refresh endpoint failed.
    #[error("Refresh failed: {0}")]
    Refresh(String),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// Lifecycle operation called in the wrong state.
    #[error("State error: {0}")]
    State(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse errors.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl PwaError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source.
    pub fn transport_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an install error.
    pub fn install(message: impl Into<String>) -> Self {
        Self::Install {
            message: message.into(),
            source: None,
        }
    }

    /// Create an install error with source.
    pub fn install_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Install {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// Create a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether this error should send a strategy down its fallback chain.
    pub fn is_transport(&self) -> bool {
        matches!(self, PwaError::Transport { .. } | PwaError::Timeout(_))
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            PwaError::Transport { .. } => "transport",
            PwaError::Install { .. } => "install",
            PwaError::Cache(_) => "cache",
            PwaError::Payload(_) => "payload",
            PwaError::Refresh(_) => "refresh",
            PwaError::Config(_) => "config",
            PwaError::State(_) => "state",
            PwaError::Io(_) => "io",
            PwaError::Json(_) => "json",
            PwaError::Url(_) => "url",
            PwaError::Timeout(_) => "timeout",
            PwaError::NotFound(_) => "not_found",
            PwaError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, PwaError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| PwaError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| PwaError::NotFound(resource.into()))
    }
}
