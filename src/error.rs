//! Crate-level error type

use thiserror::Error;

use crate::path::PathError;
use crate::registry::RegistryError;
use crate::server::ConfError;

/// Errors surfaced by the server façade
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or validated
    #[error("configuration error: {0}")]
    Conf(#[from] ConfError),

    /// The path registry rejected or could not service a request
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A path rejected a request
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
