//! Common module
//!
//! This module contains shared types, errors, and utility functions used throughout the application.

pub mod error;
pub mod log;
pub mod net;
pub mod types;

// Re-export commonly used types and functions
pub use error::{ProxyError, Result};
pub use log::init_logger;
pub use net::{bind_listener, display_addr, find_free_port, parse_ip_addr, parse_socket_addr};
pub use types::{ConnectionId, Direction, UpstreamTarget};
