//! Error handling for the perfmarker monitors
//!
//! Steady-state sampling failures are absorbed inside the monitors. These
//! types describe construction and configuration failures, which reach the
//! caller, and the per-item failures the samplers skip over.

use std::io;

use thiserror::Error;

/// The main error type for the monitors
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A monitor thread could not be created
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Metrics registration or encoding errors
    #[cfg(feature = "metrics")]
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Sink construction errors
    #[error("Sink error: {0}")]
    Sink(String),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },
}

/// Failure to take a point-in-time process list
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Process enumeration failed: {reason}")]
    EnumerationFailed { reason: String },

    #[error("Process enumeration is not supported on this platform")]
    Unsupported,

    #[error("I/O error during enumeration: {0}")]
    Io(#[from] io::Error),
}

/// Per-process page table query errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// The page table did not fit; `required` is the number of entries needed
    #[error("Page table buffer too small: {required} entries required")]
    BufferTooSmall { required: usize },

    #[error("Access denied to process {pid}")]
    AccessDenied { pid: u32 },

    #[error("Process {pid} is gone")]
    ProcessGone { pid: u32 },

    #[error("Page table queries are not supported on this platform")]
    Unsupported,

    #[error("I/O error querying process {pid}: {source}")]
    Io {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for process snapshots
pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

/// A specialized result type for page table queries
pub type QueryResult<T> = std::result::Result<T, QueryError>;

impl MonitorError {
    /// Check if the failing operation may succeed when retried
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Config(_) => false,
            // EAGAIN: the thread limit may free up
            MonitorError::Spawn { source, .. } => {
                matches!(source.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
            }
            _ => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "config",
            MonitorError::Spawn { .. } => "spawn",
            #[cfg(feature = "metrics")]
            MonitorError::Metrics(_) => "metrics",
            MonitorError::Sink(_) => "sink",
            MonitorError::Generic(_) => "generic",
        }
    }
}

impl QueryError {
    /// Classify an I/O failure against `/proc/<pid>/...`
    pub fn from_io(pid: u32, error: io::Error) -> Self {
        if error.raw_os_error() == Some(libc::ESRCH) {
            return QueryError::ProcessGone { pid };
        }
        match error.kind() {
            io::ErrorKind::PermissionDenied => QueryError::AccessDenied { pid },
            io::ErrorKind::NotFound => QueryError::ProcessGone { pid },
            _ => QueryError::Io { pid, source: error },
        }
    }
}

impl From<String> for MonitorError {
    fn from(msg: String) -> Self {
        MonitorError::Generic(msg)
    }
}

impl From<&str> for MonitorError {
    fn from(msg: &str) -> Self {
        MonitorError::Generic(msg.to_string())
    }
}
