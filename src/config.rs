//! # Configuration Management
//!
//! Settings for a table node: network timeouts and limits, the engine worker,
//! and logging.
//!
//! ## Configuration Sources
//! - TOML files via [`NodeConfig::from_file`]
//! - Environment overrides via [`NodeConfig::from_env`] (`TABLE_SESSION_*`)
//! - Direct instantiation with defaults
//!
//! Per-session parameters (address, password, player name) are not part of
//! the file format; they are passed to `host()`/`join()` as a [`SessionConfig`].

use crate::error::{ProtocolError, Result};
use crate::protocol::auth::Password;
use crate::protocol::message::{MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default time allowed for a peer to complete Hello and authentication.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound for a single encoded frame (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default port a host listens on
pub const DEFAULT_PORT: u16 = 7555;

/// Top-level node configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with `TABLE_SESSION_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides looked up through `lookup`. Unparsable values are
    /// reported rather than ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TABLE_SESSION_HANDSHAKE_TIMEOUT_MS") {
            let millis = parse_override::<u64>("TABLE_SESSION_HANDSHAKE_TIMEOUT_MS", &value)?;
            self.network.handshake_timeout = Duration::from_millis(millis);
        }

        if let Some(value) = lookup("TABLE_SESSION_MAX_FRAME_SIZE") {
            self.network.max_frame_size =
                parse_override::<usize>("TABLE_SESSION_MAX_FRAME_SIZE", &value)?;
        }

        if let Some(value) = lookup("TABLE_SESSION_PROTOCOL_VERSION") {
            self.network.protocol_version =
                parse_override::<u32>("TABLE_SESSION_PROTOCOL_VERSION", &value)?;
        }

        if let Some(name) = lookup("TABLE_SESSION_WORKER_NAME") {
            self.engine.worker_name = name;
        }

        if let Some(value) = lookup("TABLE_SESSION_LOG_LEVEL") {
            self.logging.log_level = value.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid TABLE_SESSION_LOG_LEVEL: '{value}'"))
            })?;
        }

        if let Some(value) = lookup("TABLE_SESSION_LOG_JSON") {
            self.logging.json_format = parse_override::<bool>("TABLE_SESSION_LOG_JSON", &value)?;
        }

        Ok(())
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Returns every problem found. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.network.validate());
        errors.extend(self.engine.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid {key}: '{value}'")))
}

/// Network limits shared by host and client
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NetworkSettings {
    /// Time a peer has to finish Hello and authentication. Enforced by both sides.
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Largest frame accepted from the transport
    pub max_frame_size: usize,

    /// Highest protocol version this node offers
    pub protocol_version: u32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl NetworkSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > 64 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: 64 MB)",
                self.max_frame_size
            ));
        }

        if !(MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&self.protocol_version) {
            errors.push(format!(
                "Unsupported protocol version: {} (supported: {MIN_PROTOCOL_VERSION}..={PROTOCOL_VERSION})",
                self.protocol_version
            ));
        }

        errors
    }
}

/// Command engine settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Name of the engine worker thread
    pub worker_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_name: String::from("table-engine"),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.worker_name.trim().is_empty() {
            errors.push("Engine worker name cannot be empty".to_string());
        } else if self.worker_name.contains('\0') {
            errors.push("Engine worker name cannot contain NUL bytes".to_string());
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("table-session"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Parameters for hosting or joining one table session.
pub struct SessionConfig {
    /// Address to listen on (host) or connect to (client)
    pub host_name: String,
    pub port: u16,
    /// Table password. Wiped once the client has answered the challenge.
    pub password: Password,
    pub local_player_name: String,
    pub local_table: String,
}

impl SessionConfig {
    pub fn new(
        host_name: impl Into<String>,
        port: u16,
        password: Password,
        local_player_name: impl Into<String>,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            port,
            password,
            local_player_name: local_player_name.into(),
            local_table: String::from("table"),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.local_table = table.into();
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host_name", &self.host_name)
            .field("port", &self.port)
            .field("password", &self.password)
            .field("local_player_name", &self.local_player_name)
            .field("local_table", &self.local_table)
            .finish()
    }
}

/// Durations as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `tracing::Level` as a lowercase string
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_ascii_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Level>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {raw}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        assert!(NodeConfig::default().validate().is_empty());
        assert_eq!(
            NodeConfig::default().network.handshake_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TABLE_SESSION_HANDSHAKE_TIMEOUT_MS", "2500"),
            ("TABLE_SESSION_LOG_LEVEL", "debug"),
            ("TABLE_SESSION_WORKER_NAME", "board-worker"),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.network.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(config.logging.log_level, Level::DEBUG);
        assert_eq!(config.engine.worker_name, "board-worker");
    }

    #[test]
    fn test_bad_env_override_is_reported() {
        let mut config = NodeConfig::default();
        let err = config
            .apply_env_overrides(|key| {
                (key == "TABLE_SESSION_MAX_FRAME_SIZE").then(|| "lots".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConfigError(msg) if msg.contains("MAX_FRAME_SIZE")));
    }

    #[test]
    fn test_session_config_debug_hides_password() {
        let config = SessionConfig::new("localhost", 7555, Password::new("hunter2"), "alice");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("alice"));
    }
}
