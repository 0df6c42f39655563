//! Network utility functions
//!
//! This module provides utility functions for network operations.

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use tokio::net::TcpListener;

use super::error::{ProxyError, Result};

/// Pending connection queue length for the plaintext listener
const LISTEN_BACKLOG: i32 = 1024;

/// Parse a socket address
///
/// # Arguments
///
/// * `addr` - The address string to parse
///
/// # Returns
///
/// The parsed `SocketAddr`
pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    // Try direct parsing first
    if let Ok(socket_addr) = SocketAddr::from_str(addr) {
        return Ok(socket_addr);
    }

    // Try using ToSocketAddrs trait
    match addr.to_socket_addrs() {
        Ok(mut addrs) => {
            if let Some(addr) = addrs.next() {
                Ok(addr)
            } else {
                Err(ProxyError::Config(format!("Failed to parse address: {}", addr)))
            }
        }
        Err(e) => Err(ProxyError::Config(format!("Failed to parse address {}: {}", addr, e))),
    }
}

/// Parse a listening IP address such as `0.0.0.0`, `::` or `localhost`
pub fn parse_ip_addr(addr: &str) -> Result<IpAddr> {
    if let Ok(ip) = IpAddr::from_str(addr.trim_start_matches('[').trim_end_matches(']')) {
        return Ok(ip);
    }

    parse_socket_addr(&format!("{}:0", addr)).map(|a| a.ip())
}

/// Bind a non-blocking TCP listener suitable for the tokio runtime
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// Find the first port at or above `base` that can be bound on `ip`
///
/// The port is released again before returning, so another process may
/// still take it before the caller binds it.
pub fn find_free_port(ip: IpAddr, base: u16) -> Result<u16> {
    for port in base..=u16::MAX {
        match std::net::TcpListener::bind(SocketAddr::new(ip, port)) {
            Ok(_) => {
                debug!("Found free port {} on {}", port, ip);
                return Ok(port);
            }
            Err(e) => debug!("Port {} on {} unavailable: {}", port, ip, e),
        }
    }

    Err(ProxyError::Config(format!(
        "No free port available on {} at or above {}",
        ip, base
    )))
}

/// Address to show users for a bound listener
///
/// Unspecified addresses are not connectable, so they are reported as the
/// loopback address of the same family.
pub fn display_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
