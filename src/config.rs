//! Configuration module for the connack-endpoint server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::protocols::mqtt::{HandlerSettings, LengthEncoding};

/// Runtime used to process accepted connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// One connection at a time on the main thread
    #[default]
    Sequential,
    /// Acceptor thread feeding a pool of worker threads
    Threads,
    /// Tokio task per connection
    Tokio,
}

/// Command-line arguments for the endpoint
#[derive(Parser, Debug)]
#[command(name = "connack-endpoint")]
#[command(author = "connack-endpoint authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal MQTT endpoint that acknowledges CONNECT packets", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:1883)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Connection runtime
    #[arg(short = 'r', long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum in-flight connections for the tokio runtime
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Remaining-length encoding
    #[arg(long, value_enum)]
    pub length_encoding: Option<LengthEncoding>,

    /// Per-read timeout in milliseconds (unset = wait forever)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default)]
    pub runtime: RuntimeType,
    /// Number of worker threads
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            runtime: RuntimeType::default(),
            workers: 0,
            max_connections: default_max_connections(),
        }
    }
}

/// Protocol-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub length_encoding: LengthEncoding,
    pub read_timeout_ms: Option<u64>,
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

fn default_listen() -> String {
    "0.0.0.0:1883".to_string() // MQTT default port (non-TLS)
}

fn default_backlog() -> i32 {
    128
}

fn default_max_connections() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub runtime: RuntimeType,
    pub workers: usize,
    pub max_connections: usize,
    pub length_encoding: LengthEncoding,
    pub read_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Config::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::Invalid("listen", listen.clone()))?;

        let backlog = cli.backlog.unwrap_or(toml_config.server.backlog);
        if backlog <= 0 {
            return Err(ConfigError::Invalid("backlog", backlog.to_string()));
        }

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections", "0".to_string()));
        }

        // 0 means "no timeout" in both sources
        let read_timeout = cli
            .read_timeout_ms
            .or(toml_config.protocol.read_timeout_ms)
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis);

        Ok(Config {
            listen,
            backlog,
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            max_connections,
            length_encoding: cli
                .length_encoding
                .unwrap_or(toml_config.protocol.length_encoding),
            read_timeout,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Settings handed to every connection handler.
    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            length_encoding: self.length_encoding,
            read_timeout: self.read_timeout,
        }
    }

    /// Worker count with 0 resolved to the number of CPU cores.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for '{0}': {1}")]
    Invalid(&'static str, String),
}
