//! Lifecycle events
//!
//! The server reports everything that happens to a connection through a
//! [`ProxyObserver`]. The observer is fixed at construction; when the caller
//! does not supply one, [`NoopObserver`] is used and per-connection errors are
//! only logged.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::common::{ConnectionId, ProxyError};

/// A lifecycle notification
///
/// For one connection id the order is always `ConnectionStarted`, then at
/// most one `ConnectionEstablished`, then optionally `Error`, then exactly
/// one `ConnectionEnded`.
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    /// A plaintext client was accepted
    ConnectionStarted { id: ConnectionId },
    /// The upstream handshake completed after `elapsed`
    ConnectionEstablished { id: ConnectionId, elapsed: Duration },
    /// Both endpoints of the connection are closed
    ConnectionEnded { id: ConnectionId },
    /// A failure, scoped to `id` when it belongs to one connection
    Error {
        id: Option<ConnectionId>,
        error: Arc<ProxyError>,
    },
}

impl ProxyEvent {
    /// Stable external name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionStarted { .. } => "proxyConnectionStart",
            Self::ConnectionEstablished { .. } => "proxyConnectionEstablished",
            Self::ConnectionEnded { .. } => "proxyConnectionEnded",
            Self::Error { .. } => "error",
        }
    }

    /// Connection the event belongs to
    pub fn id(&self) -> Option<ConnectionId> {
        match self {
            Self::ConnectionStarted { id }
            | Self::ConnectionEstablished { id, .. }
            | Self::ConnectionEnded { id } => Some(*id),
            Self::Error { id, .. } => *id,
        }
    }
}

impl fmt::Display for ProxyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionStarted { id } => write!(f, "{}({})", self.name(), id),
            Self::ConnectionEstablished { id, elapsed } => {
                write!(f, "{}({}, {}ms)", self.name(), id, elapsed.as_millis())
            }
            Self::ConnectionEnded { id } => write!(f, "{}({})", self.name(), id),
            Self::Error { id: Some(id), error } => write!(f, "{}({}: {})", self.name(), id, error),
            Self::Error { id: None, error } => write!(f, "{}({})", self.name(), error),
        }
    }
}

/// Receives lifecycle events
///
/// Called from connection tasks, so implementations must be cheap and must
/// not block. Closures `Fn(ProxyEvent)` implement this trait.
pub trait ProxyObserver: Send + Sync + 'static {
    /// Handle one event
    fn notify(&self, event: ProxyEvent);
}

impl<F> ProxyObserver for F
where
    F: Fn(ProxyEvent) + Send + Sync + 'static,
{
    fn notify(&self, event: ProxyEvent) {
        self(event)
    }
}

/// Observer that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProxyObserver for NoopObserver {
    fn notify(&self, _event: ProxyEvent) {}
}

/// Observer forwarding events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ProxyEvent>,
}

impl ProxyObserver for ChannelObserver {
    fn notify(&self, event: ProxyEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}

/// Create an observer whose events can be read from the returned receiver
pub fn channel_observer() -> (ChannelObserver, mpsc::UnboundedReceiver<ProxyEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelObserver { sender }, receiver)
}
