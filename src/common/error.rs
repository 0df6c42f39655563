//! Error handling module
//!
//! This module defines the error types and result type aliases used in the application.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use super::types::Direction;

/// TLS bridge error type
///
/// Construction and bind failures are returned to the caller. Everything that
/// happens inside a single proxied connection is reported through the
/// [`ProxyObserver`](crate::proxy::ProxyObserver) instead.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// OpenSSL error
    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listen address could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },

    /// `listen` was called on a server that is already listening
    #[error("Proxy server is already listening")]
    AlreadyListening,

    /// Upstream host name could not be resolved
    #[error("Failed to resolve upstream {target}: {source}")]
    Resolve {
        target: String,
        source: io::Error,
    },

    /// TCP connection to the upstream failed
    #[error("Failed to connect to upstream {target}: {source}")]
    UpstreamConnect {
        target: String,
        source: io::Error,
    },

    /// TLS handshake error
    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    /// TLS handshake did not finish in time
    #[error("TLS handshake with upstream timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Copying bytes between the two endpoints failed
    #[error("Relay error ({direction}): {source}")]
    Relay {
        direction: Direction,
        source: io::Error,
    },

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl ProxyError {
    /// Kind of the underlying I/O error, if this error wraps one
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io(e)
            | Self::Bind { source: e, .. }
            | Self::Resolve { source: e, .. }
            | Self::UpstreamConnect { source: e, .. }
            | Self::Relay { source: e, .. } => Some(e.kind()),
            Self::HandshakeTimeout(_) => Some(io::ErrorKind::TimedOut),
            _ => None,
        }
    }

    /// Whether this error belongs to a single connection rather than the server
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Self::Resolve { .. }
                | Self::UpstreamConnect { .. }
                | Self::TlsHandshake(_)
                | Self::HandshakeTimeout(_)
                | Self::Relay { .. }
        )
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `ProxyError`.
pub type Result<T> = std::result::Result<T, ProxyError>;
