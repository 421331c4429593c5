//! Configuration for the messaging engine.
//!
//! Layered: a TOML config file (`~/.config/aerochat/config.toml`)
//! overrides compiled defaults. A missing default file is not an error;
//! an explicit path that doesn't exist is.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// Top-level TOML config file structure (all fields optional).
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: BackendFileConfig,
    engine: EngineFileConfig,
}

/// `[backend]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    rest_url: Option<String>,
    push_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    auth_timeout_secs: Option<u64>,
}

/// `[engine]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EngineFileConfig {
    conversation_poll_secs: Option<u64>,
    notification_poll_secs: Option<u64>,
    backoff_initial_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    event_buffer: Option<usize>,
    send_match_tolerance_ms: Option<u64>,
}

/// Fully resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the REST backend (e.g. `https://api.example.com`).
    pub rest_url: String,
    /// WebSocket URL of the push endpoint (e.g. `wss://api.example.com/ws`).
    pub push_url: String,
    /// Timeout for establishing the push WebSocket connection.
    pub connect_timeout: Duration,
    /// Timeout for the push auth acknowledgment.
    pub auth_timeout: Duration,
    /// Interval of the conversation-list poll.
    pub conversation_poll: Duration,
    /// Interval of the notification-stats poll.
    pub notification_poll: Duration,
    /// First reconnect delay; doubles on each consecutive failure.
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling.
    pub backoff_max: Duration,
    /// Capacity of the engine's event channel.
    pub event_buffer: usize,
    /// Timestamp proximity window for matching a push broadcast to a
    /// pending optimistic send when the backend drops `client_ref`.
    pub send_match_tolerance: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rest_url: "http://127.0.0.1:8080".to_string(),
            push_url: "ws://127.0.0.1:8080/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            conversation_poll: Duration::from_secs(15),
            notification_poll: Duration::from_secs(30),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            event_buffer: 64,
            send_match_tolerance: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file merged over defaults.
    ///
    /// With `path = None` the default location is tried and a missing file
    /// yields plain defaults; an explicit path must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(path)?;
        Ok(Self::resolve(&file))
    }

    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            rest_url: file.backend.rest_url.clone().unwrap_or(defaults.rest_url),
            push_url: file.backend.push_url.clone().unwrap_or(defaults.push_url),
            connect_timeout: file
                .backend
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            auth_timeout: file
                .backend
                .auth_timeout_secs
                .map_or(defaults.auth_timeout, Duration::from_secs),
            conversation_poll: file
                .engine
                .conversation_poll_secs
                .map_or(defaults.conversation_poll, Duration::from_secs),
            notification_poll: file
                .engine
                .notification_poll_secs
                .map_or(defaults.notification_poll, Duration::from_secs),
            backoff_initial: file
                .engine
                .backoff_initial_ms
                .map_or(defaults.backoff_initial, Duration::from_millis),
            backoff_max: file
                .engine
                .backoff_max_ms
                .map_or(defaults.backoff_max, Duration::from_millis),
            event_buffer: file.engine.event_buffer.unwrap_or(defaults.event_buffer),
            send_match_tolerance: file
                .engine
                .send_match_tolerance_ms
                .map_or(defaults.send_match_tolerance, Duration::from_millis),
        }
    }
}

/// Load and parse a TOML config file.
///
/// An explicit path must exist; the default path
/// (`~/.config/aerochat/config.toml`) is tried and silently skipped if
/// missing.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("aerochat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
