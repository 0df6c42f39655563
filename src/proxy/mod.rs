//! Proxy service module
//!
//! This module implements the core of the bridge: the plaintext listener,
//! the per-connection lifecycle (accept, upstream handshake, relay,
//! teardown) and the lifecycle events reported to observers.

pub mod server;
mod connection;
mod event;
mod forwarder;
mod handler;
mod stats;

pub use server::{ProxyHandle, ProxyServer, ServerOptions};
pub use connection::ConnectionState;
pub use event::{channel_observer, ChannelObserver, NoopObserver, ProxyEvent, ProxyObserver};
pub use forwarder::{relay, RelayStats};
pub use stats::ProxyStats;
