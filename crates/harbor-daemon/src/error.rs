//! Error types for the harbor daemon

use harbor_core::container::{AliasError, ContainerError};
use harbor_core::naming::NamingError;
use harbor_core::unit::LifecycleError;
use thiserror::Error;

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Container tree errors
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Alias errors
    #[error("Alias error: {0}")]
    Alias(#[from] AliasError),

    /// Naming errors
    #[error("Naming error: {0}")]
    Naming(#[from] NamingError),

    /// Unit lifecycle errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Unknown host '{0}'")]
    UnknownHost(String),

    #[error("Host '{host}' has no unit named '{unit}'")]
    UnknownUnit { host: String, unit: String },

    /// Invalid `deploy_ignore` pattern
    #[error("Deploy filter error: {0}")]
    Regex(#[from] regex::Error),

    /// A pool task panicked or was aborted
    #[error("Worker error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
