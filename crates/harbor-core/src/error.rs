//! Error types for harbor-core

use thiserror::Error;

pub use crate::container::{AliasError, ContainerError, ValveError};
pub use crate::loader::ResolveError;
pub use crate::naming::NamingError;
pub use crate::plugin::StartupError;
pub use crate::scan::ScanError;
pub use crate::unit::LifecycleError;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, HarborError>;

/// Any error raised by the core
#[derive(Debug, Error)]
pub enum HarborError {
    /// Container tree errors
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Alias table errors
    #[error(transparent)]
    Alias(#[from] AliasError),

    /// Type resolution errors
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Artifact scanning errors
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Plugin activation errors
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// Naming resource errors
    #[error(transparent)]
    Naming(#[from] NamingError),

    /// Unit lifecycle errors
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Pipeline rejections
    #[error(transparent)]
    Valve(#[from] ValveError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
