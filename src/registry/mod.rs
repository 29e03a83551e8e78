//! Path registry
//!
//! The path manager owns the mapping from path name to [`PathHandle`] and
//! is the only code that inserts or removes entries. It runs as an actor:
//! membership changes and registry-wide queries are serialized through its
//! mailbox, so a caller never iterates the mapping while it changes.
//!
//! # Architecture
//!
//! ```text
//!      PathManagerHandle (cloneable)
//!               │ mpsc + oneshot reply
//!               ▼
//!   ┌──────────────────────────────┐
//!   │ PathManager actor            │
//!   │   conf: Arc<Conf>            │◄── PathEvent::Idle (unbounded)
//!   │   paths: BTreeMap<String,    │
//!   │          PathHandle>         │
//!   └──────────────┬───────────────┘
//!                  │ spawn / try_close / close
//!                  ▼
//!           [Path actors]
//! ```
//!
//! `list_paths` returns a copy of the mapping taken in one mailbox turn.
//! Handles in the copy stay usable after the path is removed: a closed path
//! answers `describe` with its last description.
//!
//! [`PathHandle`]: crate::path::PathHandle

pub mod error;
pub mod manager;

pub use error::RegistryError;
pub use manager::{PathManager, PathManagerHandle};
