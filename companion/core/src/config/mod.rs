//! TOML Configuration File Support
//!
//! Centralized configuration for the companion client, with an optional TOML
//! file at `~/.config/family-companion/companion.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/family-companion/companion.toml` (configuration)
//! - `$XDG_CONFIG_HOME/family-companion/session.json` (saved session)
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! api_url = "https://companion.example.org/api"
//! realtime_url = "wss://companion.example.org/ws"
//!
//! [chat]
//! typing_timeout_ms = 3000
//! command_capacity = 64
//!
//! [session]
//! file = "/home/ana/.local/state/companion/session.json"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::DEFAULT_TYPING_TIMEOUT;

/// Directory name under the XDG config dir
const APP_DIR: &str = "family-companion";

/// Default REST base URL
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Default realtime endpoint
pub const DEFAULT_REALTIME_URL: &str = "ws://localhost:5000/ws";

/// Default depth of an adapter's command queue
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerToml {
    /// REST base URL
    pub api_url: Option<String>,

    /// Realtime endpoint
    pub realtime_url: Option<String>,
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatToml {
    /// Typing inactivity timeout in milliseconds
    pub typing_timeout_ms: Option<u64>,

    /// Adapter command queue depth
    pub command_capacity: Option<usize>,
}

/// Session section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionToml {
    /// Where the session is saved
    pub file: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompanionToml {
    /// Server section
    pub server: ServerToml,

    /// Chat section
    pub chat: ChatToml,

    /// Session section
    pub session: SessionToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Chat behavior settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatConfig {
    /// Local typing inactivity timeout
    pub typing_timeout: Duration,

    /// Adapter command queue depth
    pub command_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

/// Resolved client configuration
///
/// Use [`resolve_config`] (or [`load_config`] plus [`ConfigOverrides`]) to
/// build one with proper priority handling.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// REST base URL
    pub api_url: String,

    /// Realtime endpoint
    pub realtime_url: String,

    /// Chat settings
    pub chat: ChatConfig,

    /// Where the session is saved (`None`: not persisted)
    pub session_file: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Highest-priority source that contributed a value
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            chat: ChatConfig::default(),
            session_file: default_session_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would only fail later, at connect time
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a non-HTTP API URL, a
    /// non-WebSocket realtime URL, a zero typing timeout or a zero command
    /// capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "api_url must be an http(s) URL, got {:?}",
                self.api_url
            )));
        }
        if !(self.realtime_url.starts_with("ws://") || self.realtime_url.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "realtime_url must be a ws(s) URL, got {:?}",
                self.realtime_url
            )));
        }
        if self.chat.typing_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "typing_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.chat.command_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "command_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/family-companion/companion.toml` or
/// `~/.config/family-companion/companion.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR).join("companion.toml"))
}

/// Get the default session file path
#[must_use]
pub fn default_session_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR).join("session.json"))
}

/// Load configuration from the default file, the environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: CompanionToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

/// Load, apply CLI overrides, and validate
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the final
/// configuration is invalid.
pub fn resolve_config(
    path: Option<PathBuf>,
    overrides: &ConfigOverrides,
) -> Result<ClientConfig, ConfigError> {
    let mut config = load_config_from_path(path)?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &CompanionToml) {
    if let Some(ref url) = toml.server.api_url {
        config.api_url = url.clone();
    }
    if let Some(ref url) = toml.server.realtime_url {
        config.realtime_url = url.clone();
    }

    if let Some(ms) = toml.chat.typing_timeout_ms {
        config.chat.typing_timeout = Duration::from_millis(ms);
    }
    if let Some(capacity) = toml.chat.command_capacity {
        config.chat.command_capacity = capacity;
    }

    if let Some(ref file) = toml.session.file {
        config.session_file = Some(file.clone());
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig) {
    if let Ok(url) = std::env::var("COMPANION_API_URL") {
        config.api_url = url;
        config.source = ConfigSource::Env;
    }
    if let Ok(url) = std::env::var("COMPANION_REALTIME_URL") {
        config.realtime_url = url;
        config.source = ConfigSource::Env;
    }
    if let Ok(timeout) = std::env::var("COMPANION_TYPING_TIMEOUT_MS") {
        match timeout.parse::<u64>() {
            Ok(ms) => {
                config.chat.typing_timeout = Duration::from_millis(ms);
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(value = %timeout, "Ignoring invalid COMPANION_TYPING_TIMEOUT_MS"),
        }
    }
    if let Ok(capacity) = std::env::var("COMPANION_COMMAND_CAPACITY") {
        match capacity.parse::<usize>() {
            Ok(n) => {
                config.chat.command_capacity = n;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(value = %capacity, "Ignoring invalid COMPANION_COMMAND_CAPACITY"),
        }
    }
    if let Ok(file) = std::env::var("COMPANION_SESSION_FILE") {
        config.session_file = Some(PathBuf::from(file));
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// REST base URL override
    pub api_url: Option<String>,

    /// Realtime endpoint override
    pub realtime_url: Option<String>,

    /// Typing timeout override (milliseconds)
    pub typing_timeout_ms: Option<u64>,

    /// Session file override
    pub session_file: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set REST base URL override
    #[must_use]
    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = Some(url);
        self
    }

    /// Set realtime endpoint override
    #[must_use]
    pub fn with_realtime_url(mut self, url: String) -> Self {
        self.realtime_url = Some(url);
        self
    }

    /// Set typing timeout override
    #[must_use]
    pub fn with_typing_timeout_ms(mut self, ms: u64) -> Self {
        self.typing_timeout_ms = Some(ms);
        self
    }

    /// Set session file override
    #[must_use]
    pub fn with_session_file(mut self, path: PathBuf) -> Self {
        self.session_file = Some(path);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.api_url.is_some()
            || self.realtime_url.is_some()
            || self.typing_timeout_ms.is_some()
            || self.session_file.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.api_url {
            config.api_url = url.clone();
        }
        if let Some(ref url) = self.realtime_url {
            config.realtime_url = url.clone();
        }
        if let Some(ms) = self.typing_timeout_ms {
            config.chat.typing_timeout = Duration::from_millis(ms);
        }
        if let Some(ref path) = self.session_file {
            config.session_file = Some(path.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
