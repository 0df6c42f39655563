//! TLS handling module
//!
//! This module opens the encrypted upstream connections and keeps the
//! session cache used to resume them.

pub mod connector;
mod session;

pub use connector::{
    is_unexpected_eof, Connect, Connected, SecureConnector, TlsOptions, UpstreamSession,
};
pub use session::SessionCache;
