//! Connection statistics
//!
//! Counters are kept with atomics so connection tasks can update them
//! without coordinating with the accept loop. Every update is mirrored to
//! the `metrics` facade, which is a no-op unless the embedding application
//! installs a recorder.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a server's connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Plaintext connections accepted
    pub accepted: u64,
    /// Connections whose upstream handshake succeeded
    pub established: u64,
    /// Connections that reported an error
    pub failed: u64,
    /// Connections that have ended
    pub ended: u64,
}

impl ProxyStats {
    /// Connections accepted but not yet ended
    pub fn active(&self) -> u64 {
        self.accepted.saturating_sub(self.ended)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProxyCounters {
    accepted: AtomicU64,
    established: AtomicU64,
    failed: AtomicU64,
    ended: AtomicU64,
}

impl ProxyCounters {
    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        counter!("tls_bridge_connections_accepted_total").increment(1);
        gauge!("tls_bridge_connections_active").increment(1.0);
    }

    pub(crate) fn record_established(&self) {
        self.established.fetch_add(1, Ordering::Relaxed);
        counter!("tls_bridge_connections_established_total").increment(1);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        counter!("tls_bridge_connection_errors_total").increment(1);
    }

    pub(crate) fn record_ended(&self) {
        self.ended.fetch_add(1, Ordering::Relaxed);
        counter!("tls_bridge_connections_ended_total").increment(1);
        gauge!("tls_bridge_connections_active").decrement(1.0);
    }

    pub(crate) fn snapshot(&self) -> ProxyStats {
        ProxyStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            established: self.established.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ended: self.ended.load(Ordering::Relaxed),
        }
    }
}
