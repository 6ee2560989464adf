//! Known-clients registry: every client id seen since startup.
//!
//! Append-only and used for observability only. It is never consulted for access
//! decisions.

use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct KnownClients {
    seen: Mutex<HashSet<u32>>,
}

impl KnownClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a client id. Returns `true` the first time an id is observed.
    pub fn observe(&self, uid: u32) -> bool {
        self.seen.lock().insert(uid)
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.seen.lock().contains(&uid)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
