//! Subscriber setup for binaries and tests embedding the crate.
//!
//! `RUST_LOG` takes precedence over [`LoggingConfig::log_level`].

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing_subscriber::EnvFilter;

fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(config))
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ProtocolError::ConfigError(format!("logging: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialised");
    Ok(())
}

/// Like [`init_logging`], but a subscriber that is already installed is
/// left in place. Handy in tests, where every case may try to install one.
pub fn try_init_logging(config: &LoggingConfig) -> bool {
    init_logging(config).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_second_install_is_rejected() {
        let config = LoggingConfig {
            log_level: Level::DEBUG,
            ..LoggingConfig::default()
        };
        try_init_logging(&config);
        assert!(init_logging(&config).is_err());
        assert!(!try_init_logging(&config));
    }
}
