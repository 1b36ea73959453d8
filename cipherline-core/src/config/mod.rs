//! Configuration management for Cipherline
//!
//! Layered the usual way: defaults, then an optional TOML file, then
//! `CIPHERLINE_<SECTION>_<KEY>` environment overrides, then [`Config::validate`].

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::core_crypto::MAX_PLAINTEXT_LEN;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub identity: IdentityConfig,
    pub log: MessageLogConfig,
    pub conversation: ConversationConfig,
    pub logging: LoggingConfig,
}

/// Where the local identity and its keypair live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Directory holding the keystore, directory and log files
    pub data_dir: PathBuf,

    /// Name of the environment variable holding the keystore passphrase.
    /// When the variable is unset the keypair is stored unencrypted.
    pub passphrase_env: String,
}

/// Which message log backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    Memory,
    File,
}

impl FromStr for LogBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(LogBackend::Memory),
            "file" => Ok(LogBackend::File),
            other => Err(ConfigError::InvalidValue(format!(
                "Invalid log backend: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageLogConfig {
    pub backend: LogBackend,

    /// Log file path for the file backend; relative paths resolve against `identity.data_dir`
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Largest plaintext (in bytes) a single message may carry
    pub max_plaintext_len: usize,

    /// Upper bound on a single history query
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,

    /// Buffered notifications per conversation before slow listeners lag
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./cipherline-data"),
            passphrase_env: "CIPHERLINE_PASSPHRASE".to_string(),
        }
    }
}

impl Default for MessageLogConfig {
    fn default() -> Self {
        Self {
            backend: LogBackend::File,
            path: PathBuf::from("messages.log"),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_plaintext_len: MAX_PLAINTEXT_LEN,
            query_timeout: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn parse_env<T>(key: &str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
}

impl Config {
    /// Load configuration from defaults plus environment variables
    ///
    /// Environment variables follow the pattern: `CIPHERLINE_<SECTION>_<KEY>`
    /// Example: `CIPHERLINE_LOG_BACKEND=memory`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let mut config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CIPHERLINE_IDENTITY_DATA_DIR") {
            self.identity.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("CIPHERLINE_IDENTITY_PASSPHRASE_ENV") {
            self.identity.passphrase_env = name;
        }

        if let Some(backend) = lookup("CIPHERLINE_LOG_BACKEND") {
            self.log.backend = backend.parse()?;
        }
        if let Some(path) = lookup("CIPHERLINE_LOG_PATH") {
            self.log.path = PathBuf::from(path);
        }

        if let Some(len) = lookup("CIPHERLINE_CONVERSATION_MAX_PLAINTEXT_LEN") {
            self.conversation.max_plaintext_len =
                parse_env("CIPHERLINE_CONVERSATION_MAX_PLAINTEXT_LEN", len)?;
        }
        if let Some(timeout) = lookup("CIPHERLINE_CONVERSATION_QUERY_TIMEOUT") {
            self.conversation.query_timeout = humantime_serde::re::humantime::parse_duration(
                &timeout,
            )
            .map_err(|e| {
                ConfigError::InvalidValue(format!("CIPHERLINE_CONVERSATION_QUERY_TIMEOUT: {}", e))
            })?;
        }

        if let Some(level) = lookup("CIPHERLINE_LOGGING_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("CIPHERLINE_LOGGING_JSON") {
            self.logging.json_format = parse_env("CIPHERLINE_LOGGING_JSON", json)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conversation.max_plaintext_len == 0
            || self.conversation.max_plaintext_len > MAX_PLAINTEXT_LEN
        {
            return Err(ConfigError::ValidationFailed(format!(
                "max_plaintext_len must be between 1 and {}",
                MAX_PLAINTEXT_LEN
            )));
        }

        if self.conversation.event_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "event_capacity must be greater than 0".to_string(),
            ));
        }

        if self.conversation.query_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "query_timeout must be greater than 0".to_string(),
            ));
        }

        if self.log.backend == LogBackend::File && self.log.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "file log backend requires a path".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }

    /// Resolved path of the message log file
    pub fn log_path(&self) -> PathBuf {
        if self.log.path.is_absolute() {
            self.log.path.clone()
        } else {
            self.identity.data_dir.join(&self.log.path)
        }
    }

    /// Keystore passphrase, if the configured environment variable is set
    pub fn passphrase(&self) -> Option<String> {
        env::var(&self.identity.passphrase_env)
            .ok()
            .filter(|p| !p.is_empty())
    }
}
