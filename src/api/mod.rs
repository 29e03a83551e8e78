//! Administrative HTTP API
//!
//! Read-only endpoints:
//! - GET /config/get - current configuration snapshot
//! - GET /paths/list - description of every path
//!
//! Other methods on those routes answer 404, as do unknown routes.

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{router, ApiServer, PathsList};
