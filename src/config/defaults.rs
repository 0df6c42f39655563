//! Default configuration values
//!
//! This module provides default values for configuration options.
//! It is designed to be a single source of truth for defaults,
//! making it easier to maintain consistent defaults across the application.

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "TLS_BRIDGE";

/// Environment variable naming the configuration file
pub const CONFIG_FILE_ENV: &str = "TLS_BRIDGE_CONFIG_FILE";

/// Default upstream port
pub const UPSTREAM_PORT: u16 = 443;

/// Default local listening address as string
pub const LOCAL_ADDRESS_STR: &str = "0.0.0.0";

/// First port tried when no local port is configured
pub const FREE_PORT_BASE: u16 = 8000;

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// Default upstream port
pub fn upstream_port() -> u16 {
    UPSTREAM_PORT
}

/// Default local listening address
pub fn local_address() -> String {
    LOCAL_ADDRESS_STR.to_string()
}

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

/// Default buffer size (8KB)
pub fn buffer_size() -> usize {
    8192
}

/// Default grace period for open connections on shutdown, in seconds
pub fn shutdown_timeout() -> u64 {
    30
}
