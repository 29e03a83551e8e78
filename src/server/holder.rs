//! Configuration snapshot holder
//!
//! Readers get an `Arc<Conf>` they can keep for as long as they like; a
//! reload swaps the pointer and never touches a snapshot already handed out.

use std::sync::Arc;

use parking_lot::Mutex;

use super::config::Conf;

/// Single mutable pointer to an immutable configuration snapshot
#[derive(Debug)]
pub struct ConfHolder {
    current: Mutex<Arc<Conf>>,
}

impl ConfHolder {
    /// Create a holder with an initial snapshot
    pub fn new(conf: Arc<Conf>) -> Self {
        Self {
            current: Mutex::new(conf),
        }
    }

    /// Current snapshot
    ///
    /// The lock is held only for the `Arc` clone.
    pub fn current(&self) -> Arc<Conf> {
        self.current.lock().clone()
    }

    /// Replace the current snapshot, returning the previous one
    pub fn replace(&self, conf: Arc<Conf>) -> Arc<Conf> {
        std::mem::replace(&mut *self.current.lock(), conf)
    }
}
