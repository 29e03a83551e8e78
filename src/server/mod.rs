//! Server configuration and top-level wiring

pub mod config;
pub mod holder;
pub mod listener;

pub use config::{Conf, ConfError, LogLevel, PathConf, SourceKind};
pub use holder::ConfHolder;
pub use listener::Server;
