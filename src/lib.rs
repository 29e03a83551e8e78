//! Path registry and administrative API for a media streaming server
//!
//! The crate exposes the live configuration and the set of active stream
//! endpoints ("paths") of a server whose state is mutated continuously by
//! publishing clients and pull sources.
//!
//! # Architecture
//!
//! ```text
//!   GET /paths/list
//!         │
//!         ▼
//!    [ApiServer] ──list_paths()──► [PathManager actor]
//!         │                          owns BTreeMap<name, PathHandle>
//!         │
//!         ├──describe()──► [Path actor "cam1"]  source + state
//!         ├──describe()──► [Path actor "live"]  source + state
//!         ▼
//!    {"items": [...]}
//! ```
//!
//! Every actor owns its mutable state and is reached only through an
//! `mpsc` mailbox carrying a `oneshot` reply slot. The configuration is the
//! only state guarded by a lock, held for a pointer swap or clone.

pub mod api;
pub mod error;
pub mod path;
pub mod registry;
pub mod server;
pub mod source;

pub use api::ApiServer;
pub use error::{Error, Result};
pub use path::{Path, PathHandle, PathItem, SourceState};
pub use registry::{PathManager, PathManagerHandle};
pub use server::{Conf, ConfHolder, PathConf, Server};
pub use source::{PathSource, Source, SourceDescription, StaticSource};
