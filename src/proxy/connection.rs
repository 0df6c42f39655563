//! Per-connection lifecycle tracking
//!
//! A [`Connection`] is created when a plaintext client is accepted and owns
//! the event bookkeeping for it. Dropping it is the only way a connection
//! reaches [`ConnectionState::Ended`], so the ended event is emitted exactly
//! once on every path, including task cancellation.

use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::{ConnectionId, ProxyError};
use super::event::{ProxyEvent, ProxyObserver};
use super::stats::ProxyCounters;

/// Lifecycle state of a proxied connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, nothing attempted yet
    Started,
    /// Upstream handshake in flight
    Connecting,
    /// Upstream handshake done
    Established,
    /// Bytes are being relayed
    Relaying,
    /// Both endpoints released
    Ended,
}

pub(crate) struct Connection {
    id: ConnectionId,
    start: Instant,
    state: ConnectionState,
    observer: Arc<dyn ProxyObserver>,
    counters: Arc<ProxyCounters>,
}

impl Connection {
    /// Register a freshly accepted connection and emit its start event
    pub(crate) fn start(
        id: ConnectionId,
        observer: Arc<dyn ProxyObserver>,
        counters: Arc<ProxyCounters>,
    ) -> Self {
        counters.record_accepted();
        observer.notify(ProxyEvent::ConnectionStarted { id });

        Self {
            id,
            start: Instant::now(),
            state: ConnectionState::Started,
            observer,
            counters,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Mark the upstream handshake as complete and report its duration
    pub(crate) fn established(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.state = ConnectionState::Established;
        self.counters.record_established();
        self.observer.notify(ProxyEvent::ConnectionEstablished {
            id: self.id,
            elapsed,
        });
        elapsed
    }

    pub(crate) fn relaying(&mut self) {
        self.state = ConnectionState::Relaying;
    }

    /// Report a failure of this connection
    ///
    /// Upstream and relay failures are expected traffic and logged as
    /// warnings; anything else points at a local problem.
    pub(crate) fn fail(&mut self, error: ProxyError) {
        if error.is_connection_scoped() {
            warn!("Connection {} failed: {}", self.id, error);
        } else {
            error!("Connection {} failed: {}", self.id, error);
        }
        self.counters.record_failed();
        self.observer.notify(ProxyEvent::Error {
            id: Some(self.id),
            error: Arc::new(error),
        });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!(
            "Connection {} ended after {} ms (last state: {:?})",
            self.id,
            self.start.elapsed().as_millis(),
            self.state
        );
        self.state = ConnectionState::Ended;
        self.counters.record_ended();
        self.observer.notify(ProxyEvent::ConnectionEnded { id: self.id });
    }
}
