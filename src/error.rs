//! Error types for Plus Monitoring

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while monitoring backends
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A single service entry is invalid
    #[error("Invalid configuration for service {service}: {reason}")]
    Configuration { service: String, reason: String },

    /// Service type has no registered driver
    #[error("Unknown service type '{service_type}' for service {service}")]
    UnknownServiceType {
        service: String,
        service_type: String,
    },

    /// Configuration file could not be read
    #[error("Failed to read configuration file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Connection to a backend could not be established
    #[error("Error connecting to {backend}: {reason}")]
    Connection { backend: String, reason: String },

    /// Liveness round-trip failed
    #[error("{backend} operation error: {reason}")]
    Exercise { backend: String, reason: String },

    /// Probe step exceeded the configured timeout
    #[error("Probe for service {service} timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a connection error for the given backend.
    pub fn connection(backend: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Connection {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an exercise error for the given backend.
    pub fn exercise(backend: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Exercise {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Configuration problems are scoped to one service or to the service set.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. }
                | Error::UnknownServiceType { .. }
                | Error::ConfigFile { .. }
                | Error::ConfigParse(_)
        )
    }

    /// Backend problems are recovered at the probe loop boundary.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Exercise { .. } | Error::Timeout { .. }
        )
    }
}
