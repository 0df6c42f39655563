//! TLS Bridge: plaintext-to-TLS bridging proxy
//!
//! This library implements a TCP proxy that accepts plaintext connections
//! from local clients and bridges each of them to one fixed upstream server
//! over TLS. A client that only speaks e.g. HTTP can reach an HTTPS-only
//! server without implementing the handshake itself.
//!
//! # Main Features
//!
//! - One TLS connection to the upstream per accepted client
//! - Unmodified bidirectional relay with backpressure
//! - Opportunistic TLS session resumption across connections
//! - Lifecycle events (`proxyConnectionStart`, `proxyConnectionEstablished`,
//!   `proxyConnectionEnded`, `error`) delivered to an observer
//!
//! # Example
//!
//! ```no_run
//! use tls_bridge::{ProxyEvent, ProxyServer, Result, ServerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let observer = |event: ProxyEvent| println!("{}", event);
//!     let server = ProxyServer::with_observer(ServerOptions::new("example.com", 443), observer)?;
//!
//!     let handle = server.listen("127.0.0.1:8080".parse().unwrap()).await?;
//!     println!("Listening on http://{}", handle.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod proxy;
pub mod tls;

// Re-export commonly used structures and functions for convenience
pub use common::{ConnectionId, ProxyError, Result, UpstreamTarget};
pub use proxy::{
    channel_observer, NoopObserver, ProxyEvent, ProxyHandle, ProxyObserver, ProxyServer,
    ProxyStats, ServerOptions,
};
pub use tls::{Connect, SecureConnector, TlsOptions};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
