//! Paths: named stream endpoints
//!
//! Each path is an actor. Its source, readiness state and publisher are
//! private to the actor task; everything else talks to it through a
//! [`PathHandle`].
//!
//! # Architecture
//!
//! ```text
//!    [Publisher]       [PathManager]        [ApiServer]
//!    announce/record   try_close/close      describe
//!         │                  │                  │
//!         └──────────────────┼──────────────────┘
//!                            ▼
//!                   mpsc::Sender<PathRequest>
//!                            │
//!                            ▼
//!                ┌───────────────────────┐
//!                │ Path actor            │◄── SourceState reports
//!                │   source: PathSource  │    (static pull worker)
//!                │   source_state        │
//!                │   publisher_id        │
//!                └───────────────────────┘
//! ```
//!
//! A description is assembled within a single mailbox turn, so it can never
//! mix a source from before a mutation with a state from after it.

pub mod actor;
pub mod error;
pub mod state;

pub use actor::{Path, PathEvent, PathHandle, PathItem};
pub use error::PathError;
pub use state::SourceState;
