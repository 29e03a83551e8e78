//! Registry error types

use thiserror::Error;

use crate::path::PathError;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry is shut down or shutting down
    #[error("path registry is not available")]
    Unavailable,

    /// The requested path name is not acceptable
    #[error("{0}")]
    InvalidPathName(String),

    /// No configuration entry matches the path name
    #[error("path '{0}' is not configured")]
    PathNotConfigured(String),

    /// The path rejected the request
    #[error(transparent)]
    Path(#[from] PathError),
}
