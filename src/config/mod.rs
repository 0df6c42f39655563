//! Configuration module
//!
//! This module handles application configuration, including loading from
//! different sources (files, environment variables) and validating the
//! configuration. Command line arguments are layered on top by the binary.

pub mod defaults;
mod loader;
mod types;
mod validator;

pub use self::defaults::{CONFIG_FILE_ENV, ENV_PREFIX};
pub use self::loader::ConfigLoader;
pub use self::types::ProxyConfig;
pub use self::validator::{validate_config, ConfigValidator};
