//! # Error Handling Module
//!
//! Errors raised by routebox fall into two groups:
//!
//! - **Fatal** errors surface while the cache layer is being registered
//!   (invalid configuration, unknown backend, unreadable config file). The
//!   process must not start serving with an invalid policy schema.
//! - **Recoverable** errors come from the cache backend during a request. They
//!   are wrapped in [`RouteboxError::BackendRead`] / [`RouteboxError::BackendWrite`]
//!   purely so they can be logged with a stable type tag; the request itself
//!   always proceeds as if the cache were empty.
//!
//! A policy that does not apply to a request is not an error at all. That
//! outcome is modelled by [`crate::caching::LookupOutcome::NotApplicable`].

use thiserror::Error;

use crate::caching::CacheError;

/// Main result type used throughout routebox
pub type RouteboxResult<T> = Result<T, RouteboxError>;

/// Error taxonomy for the caching layer
#[derive(Debug, Error)]
pub enum RouteboxError {
    /// Invalid configuration detected at startup
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Backend failure while looking up a cached response
    #[error("Cache read failed: {0}")]
    BackendRead(#[source] CacheError),

    /// Backend failure while storing a response
    #[error("Cache write failed: {0}")]
    BackendWrite(#[source] CacheError),

    /// Backend failure while building backends from configuration
    #[error("Cache backend error: {0}")]
    Backend(#[from] CacheError),

    /// I/O errors (config files, listener sockets)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON parsing errors for configuration files
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl RouteboxError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error must stop the process from starting
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::BackendRead(_) | Self::BackendWrite(_))
    }

    /// Stable tag used as a structured log field
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "config_validation_error",
            Self::BackendRead(_) => "backend_read_error",
            Self::BackendWrite(_) => "backend_write_error",
            Self::Backend(_) => "backend_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<std::io::Error> for RouteboxError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RouteboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RouteboxError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}
