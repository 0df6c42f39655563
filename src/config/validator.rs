//! Configuration validator
//!
//! This module provides functionality for validating configuration.

use crate::common::log::is_valid_level;
use crate::common::{ProxyError, Result, UpstreamTarget};
use super::types::ProxyConfig;

/// Validate the configuration
pub fn validate_config(config: &ProxyConfig) -> Result<()> {
    validate_upstream_settings(config)?;
    validate_listener_settings(config)?;
    validate_general_settings(config)?;

    Ok(())
}

/// Validate upstream settings
fn validate_upstream_settings(config: &ProxyConfig) -> Result<()> {
    if config.upstream_host.trim().is_empty() {
        return Err(ProxyError::Config(
            "Upstream address is required (upstream_host)".to_string(),
        ));
    }

    UpstreamTarget::new(config.upstream_host.as_str(), config.upstream_port)?;

    if let Some(ca_file) = &config.ca_file {
        if !ca_file.is_file() {
            return Err(ProxyError::Config(format!(
                "CA file does not exist or is not a file: {}",
                ca_file.display()
            )));
        }
    }

    if let Some(name) = &config.server_name {
        if name.trim().is_empty() {
            return Err(ProxyError::Config(
                "Server name must not be empty".to_string(),
            ));
        }
    }

    if config.handshake_timeout == Some(0) {
        return Err(ProxyError::Config(
            "Handshake timeout must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Validate listener settings
fn validate_listener_settings(config: &ProxyConfig) -> Result<()> {
    config.local_ip().map_err(|_| {
        ProxyError::Config(format!(
            "Invalid local address: {}",
            config.local_address
        ))
    })?;

    Ok(())
}

/// Validate general settings
///
/// An unknown log level is not fatal; see [`ConfigValidator::check_warnings`].
fn validate_general_settings(config: &ProxyConfig) -> Result<()> {
    if config.buffer_size == 0 {
        return Err(ProxyError::Config(
            "Buffer size must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Configuration validator trait
pub trait ConfigValidator {
    /// Check the configuration, failing on unusable values
    fn validate(&self) -> Result<()>;

    /// Non-fatal issues worth reporting to the user
    fn check_warnings(&self) -> Vec<String>;
}

impl ConfigValidator for ProxyConfig {
    fn validate(&self) -> Result<()> {
        validate_config(self)
    }

    fn check_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !is_valid_level(self.log_level()) {
            warnings.push(format!("Invalid log level '{}', using default 'info'", self.log_level()));
        }

        if self.insecure {
            warnings.push("Upstream certificate verification is disabled (insecure)".to_string());
            if self.server_name.is_some() {
                warnings.push("server_name is only used for SNI when insecure is set".to_string());
            }
        }

        if self.local_port == Some(0) {
            warnings.push("Local port 0 lets the operating system pick a port".to_string());
        }

        warnings
    }
}
