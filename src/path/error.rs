//! Path error types

use thiserror::Error;

/// Error type for path operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path actor is gone and left no description behind
    #[error("path '{0}' is closed")]
    Terminated(String),

    /// Publishers can't attach to a path fed by a static source
    #[error("path '{0}' is assigned to a static source")]
    StaticSourceAssigned(String),

    /// The path already has a publisher
    #[error("someone is already publishing to path '{0}'")]
    AlreadyPublishing(String),

    /// The session is not the current publisher
    #[error("session {session_id} is not publishing to path '{path}'")]
    PublisherMismatch { path: String, session_id: u64 },
}
