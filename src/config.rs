//! Configuration module for uring-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "uring-echo")]
#[command(author = "uring-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded io_uring TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Port to listen on
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Listen queue length
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Submission queue entries
    #[arg(long)]
    pub ring_size: Option<u32>,

    /// Completions dispatched per drain pass
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(short = 'c', long)]
    pub max_connections: Option<usize>,

    /// Per-connection buffer size in bytes
    #[arg(short = 'm', long)]
    pub message_len: Option<usize>,

    /// Seconds a connection may sit on one operation before it is closed (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and ring configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_ring_size")]
    pub ring_size: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backlog: default_backlog(),
            ring_size: default_ring_size(),
            batch_size: default_batch_size(),
        }
    }
}

/// Connection table configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_message_len")]
    pub message_len: usize,
    /// Idle timeout in seconds, 0 disables it
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            message_len: default_message_len(),
            idle_timeout: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_backlog() -> u32 {
    512
}

fn default_ring_size() -> u32 {
    4096
}

fn default_batch_size() -> usize {
    512
}

fn default_max_connections() -> usize {
    4096
}

fn default_message_len() -> usize {
    2048
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub ring_size: u32,
    pub batch_size: usize,
    pub max_connections: usize,
    pub message_len: usize,
    pub idle_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            backlog: default_backlog(),
            ring_size: default_ring_size(),
            batch_size: default_batch_size(),
            max_connections: default_max_connections(),
            message_len: default_message_len(),
            idle_timeout: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let idle_secs = cli
            .idle_timeout
            .unwrap_or(toml_config.connections.idle_timeout);

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            ring_size: cli.ring_size.unwrap_or(toml_config.server.ring_size),
            batch_size: cli.batch_size.unwrap_or(toml_config.server.batch_size),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.connections.max_connections),
            message_len: cli
                .message_len
                .unwrap_or(toml_config.connections.message_len),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_size == 0 {
            return Err(ConfigError::Invalid("ring_size must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be non-zero"));
        }
        if self.message_len == 0 || self.message_len > u32::MAX as usize {
            return Err(ConfigError::Invalid(
                "message_len must be between 1 and u32::MAX",
            ));
        }
        // u32::MAX is the reserved listener index
        if self.max_connections == 0 || self.max_connections >= u32::MAX as usize {
            return Err(ConfigError::Invalid(
                "max_connections must be between 1 and u32::MAX - 1",
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
