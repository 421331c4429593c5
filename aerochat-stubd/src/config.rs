//! Configuration for the stub backend.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/aerochat-stubd/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

/// Errors that can occur when loading stub configuration.
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

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StubConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    seed_users: Option<Vec<SeedUser>>,
}

/// A user seeded at startup so clients can authenticate immediately.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SeedUser {
    /// Bearer token the user authenticates with.
    pub token: String,
    /// User identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// CLI arguments for the stub backend.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "AeroChat stub messaging backend")]
pub struct StubCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "AEROCHAT_STUB_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/aerochat-stubd/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "AEROCHAT_STUB_LOG")]
    pub log_level: String,
}

/// Fully resolved stub configuration.
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Address to bind the server to.
    pub bind_addr: String,
    /// Users registered at startup.
    pub seed_users: Vec<SeedUser>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            seed_users: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl StubConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &StubCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    fn resolve(cli: &StubCliArgs, file: &StubConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            seed_users: file.server.seed_users.clone().unwrap_or_default(),
            log_level: cli.log_level.clone(),
        }
    }
}

/// Load and parse a TOML config file for the stub.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<StubConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(StubConfigFile::default());
        };
        config_dir.join("aerochat-stubd").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StubConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
