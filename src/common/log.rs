//! Logging utilities
//!
//! This module wires the `log` facade to `env_logger`.

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `level` when it is set. An unknown
/// `level` falls back to `info`.
///
/// # Parameters
///
/// * `level` - Log level
pub fn init_logger(level: &str) {
    let level = if is_valid_level(level) { level } else { "info" };
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level);

    // A second initialization (tests, embedding) is not an error for us
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Check whether a log level name is one `env_logger` understands
pub fn is_valid_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "off" | "error" | "warn" | "info" | "debug" | "trace"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger() {
        // Global logger: only make sure repeated calls do not panic
        init_logger("debug");
        init_logger("info");
    }

    #[test]
    fn test_is_valid_level() {
        assert!(is_valid_level("info"));
        assert!(is_valid_level("TRACE"));
        assert!(!is_valid_level("verbose"));
    }
}
