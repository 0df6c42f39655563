//! Shared TLS session cache
//!
//! One slot per server holding the session of the most recently completed
//! upstream handshake. Connections read it when they start a handshake and
//! overwrite it when theirs succeeds; the last completed handshake wins.

use std::sync::{Mutex, PoisonError};

/// Single-slot session cache shared by all connections of a server
#[derive(Debug)]
pub struct SessionCache<S> {
    slot: Mutex<Option<S>>,
}

impl<S: Clone> SessionCache<S> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    /// Current cached session, if any
    pub fn load(&self) -> Option<S> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the cached session, returning the previous one
    pub fn store(&self, session: S) -> Option<S> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(session)
    }

    /// Whether no session has been cached yet
    pub fn is_empty(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

impl<S: Clone> Default for SessionCache<S> {
    fn default() -> Self {
        Self::new()
    }
}
