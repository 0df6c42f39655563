//! Configuration types
//!
//! This module contains the main configuration type used throughout the application.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::common::{parse_ip_addr, Result};
use super::defaults;

/// Proxy configuration
///
/// Contains all configuration options of the `tls-bridge` binary. Values are
/// layered from defaults, a JSON file, `TLS_BRIDGE_*` environment variables
/// and the command line, in that order of increasing priority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct ProxyConfig {
    // --- Upstream settings ---

    /// Upstream TLS server host name or IP address
    pub upstream_host: String,

    /// Upstream TLS server port
    pub upstream_port: u16,

    /// Skip verification of the upstream certificate
    pub insecure: bool,

    /// Additional CA bundle (PEM) trusted for the upstream certificate
    pub ca_file: Option<PathBuf>,

    /// Name used for SNI and certificate verification instead of the host
    pub server_name: Option<String>,

    /// Upstream handshake timeout in seconds (none by default)
    pub handshake_timeout: Option<u64>,

    // --- Local listener settings ---

    /// Local plaintext listening address
    pub local_address: String,

    /// Local plaintext listening port; a free port is picked when unset
    pub local_port: Option<u16>,

    // --- General settings ---

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Relay buffer size per direction (in bytes)
    pub buffer_size: usize,

    /// Grace period for open connections on shutdown, in seconds
    pub shutdown_timeout: u64,

    /// Configuration file the values were loaded from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_host: String::new(),
            upstream_port: defaults::upstream_port(),
            insecure: false,
            ca_file: None,
            server_name: None,
            handshake_timeout: None,
            local_address: defaults::local_address(),
            local_port: None,
            log_level: defaults::log_level(),
            buffer_size: defaults::buffer_size(),
            shutdown_timeout: defaults::shutdown_timeout(),
            config_file: None,
        }
    }
}

impl ProxyConfig {
    /// Parsed local listening address
    pub fn local_ip(&self) -> Result<IpAddr> {
        parse_ip_addr(&self.local_address)
    }

    /// Local socket address, if a port is configured
    pub fn local_socket_addr(&self) -> Result<Option<SocketAddr>> {
        let ip = self.local_ip()?;
        Ok(self.local_port.map(|port| SocketAddr::new(ip, port)))
    }

    /// Log level
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}
