//! Shared types module
//!
//! This module contains shared data types and structures used throughout the application.

use std::fmt;

use super::error::{ProxyError, Result};

/// Identifier of one proxied connection
///
/// Ids are handed out in accept order starting at 0 and are never reused
/// for the lifetime of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed upstream endpoint that every connection is bridged to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamTarget {
    host: String,
    port: u16,
}

impl UpstreamTarget {
    /// Create a validated upstream target
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Config` if the host is empty or the port is 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let trimmed = host.trim();

        if trimmed.is_empty() {
            return Err(ProxyError::Config(
                "Upstream server host must be a non-empty string".to_string(),
            ));
        }
        if port == 0 {
            return Err(ProxyError::Config(
                "Upstream server port must be in the range 1-65535".to_string(),
            ));
        }

        // Accept "[::1]" style literals as well as bare addresses
        let host = trimmed
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(trimmed)
            .to_string();

        Ok(Self { host, port })
    }

    /// Upstream host name or IP literal
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Upstream port
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Direction of a relayed byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Plaintext client to TLS upstream
    ToUpstream,
    /// TLS upstream to plaintext client
    ToDownstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToUpstream => write!(f, "client to upstream"),
            Self::ToDownstream => write!(f, "upstream to client"),
        }
    }
}
