//! Stream sources
//!
//! A source is anything that feeds a path. Publishing clients are generic
//! sources: they come and go on their own. Static sources are created from
//! configuration, pull from an upstream server and must be closed
//! explicitly by whoever owns them.
//!
//! The owning path keeps its source as `Option<PathSource>`; `None` is the
//! "no source" case and is reported as `null` by the API.

pub mod publisher;
pub mod pull;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use publisher::{PublisherProtocol, PublisherSource};
pub use pull::{PullProtocol, PullSource, PullTarget};

/// Error raised while tearing down a static source
#[derive(Debug, Error)]
pub enum SourceError {
    /// The background worker panicked or was cancelled
    #[error("source worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// JSON self-description of a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescription {
    /// Source kind, e.g. `rtspSession` or `rtmpSource`
    #[serde(rename = "type")]
    pub kind: &'static str,

    /// Identifier of the session behind the source, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SourceDescription {
    /// Description without an identifier
    pub fn new(kind: &'static str) -> Self {
        Self { kind, id: None }
    }

    /// Description with an identifier
    pub fn with_id(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }
}

/// Anything that can feed a path
pub trait Source: Send + Sync {
    /// Describe the source
    ///
    /// Must not fail and must not have side effects, even when the
    /// underlying connection is unhealthy.
    fn describe(&self) -> SourceDescription;
}

/// A source created from configuration
///
/// `close` consumes the source: it is called at most once and the source
/// cannot be queried afterwards.
#[async_trait]
pub trait StaticSource: Source {
    /// Release connections, tasks and timers held by the source
    async fn close(self: Box<Self>) -> Result<(), SourceError>;
}

/// Source currently attached to a path
pub enum PathSource {
    /// Attached by a publishing client
    Generic(Box<dyn Source>),
    /// Created from the path configuration
    Static(Box<dyn StaticSource>),
}

impl PathSource {
    /// Describe the wrapped source
    pub fn describe(&self) -> SourceDescription {
        match self {
            PathSource::Generic(source) => source.describe(),
            PathSource::Static(source) => source.describe(),
        }
    }

    /// Whether the wrapped source is static
    pub fn is_static(&self) -> bool {
        matches!(self, PathSource::Static(_))
    }
}

impl fmt::Debug for PathSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            PathSource::Generic(_) => "Generic",
            PathSource::Static(_) => "Static",
        };
        f.debug_tuple(variant).field(&self.describe()).finish()
    }
}
