//! Configuration loading functionality
//!
//! This module layers configuration from a JSON file and environment
//! variables on top of the defaults, using the `config` crate.

use ::config::{Config, Environment, File, FileFormat};
use log::debug;
use std::path::Path;

use crate::common::{ProxyError, Result};
use super::defaults::ENV_PREFIX;
use super::types::ProxyConfig;

/// Trait for loading configuration from different sources
pub trait ConfigLoader: Sized {
    /// Load configuration with proper priority:
    /// 1. Default values (lowest priority)
    /// 2. Configuration file, if given
    /// 3. Environment variables (`TLS_BRIDGE_*`)
    ///
    /// Command line arguments are applied by the caller afterwards.
    fn load(config_file: Option<&Path>) -> Result<Self>;
}

impl ConfigLoader for ProxyConfig {
    fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            check_config_file(path)?;
            debug!("Loading configuration from file: {}", path.display());
            builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Json));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let mut config: ProxyConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ProxyError::Config(format!("Failed to load configuration: {}", e)))?;

        if let Some(path) = config_file {
            config.config_file = Some(path.to_path_buf());
        }

        Ok(config)
    }
}

fn check_config_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(ProxyError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    Ok(())
}
