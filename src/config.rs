//! Configuration module for the ledgerd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::connection::ConnectionLimits;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the ledger server
#[derive(Parser, Debug)]
#[command(name = "ledgerd")]
#[command(author = "ledgerd authors")]
#[command(version = "0.1.0")]
#[command(about = "A raw-TCP RPC server backed by a durable account ledger", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Directory holding account snapshots and the journal
    #[arg(short = 'd', long)]
    pub data_dir: Option<PathBuf>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

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
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Absolute limit on reading one request, in milliseconds
    #[serde(default = "default_max_connection_time_ms")]
    pub max_connection_time_ms: u64,
    /// How long to wait for the first bytes, in milliseconds
    #[serde(default = "default_data_wait_ms")]
    pub data_wait_ms: u64,
    /// Idle gap that ends a body without Content-Length, in milliseconds
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,
    /// Largest accepted request body in bytes
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
            max_connection_time_ms: default_max_connection_time_ms(),
            data_wait_ms: default_data_wait_ms(),
            settle_interval_ms: default_settle_interval_ms(),
            max_request_size: default_max_request_size(),
        }
    }
}

/// Ledger-related configuration
#[derive(Debug, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Balance credited to newly registered accounts
    #[serde(default = "default_opening_balance")]
    pub opening_balance: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            opening_balance: default_opening_balance(),
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

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_connection_time_ms() -> u64 {
    60_000
}

fn default_data_wait_ms() -> u64 {
    60_000
}

fn default_settle_interval_ms() -> u64 {
    100
}

fn default_max_request_size() -> usize {
    16 * 1024 * 1024 // 16 MiB
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_opening_balance() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub limits: ConnectionLimits,
    pub data_dir: PathBuf,
    pub opening_balance: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        Config {
            listen: cli.listen.unwrap_or(server.listen),
            workers: cli.workers.or(server.workers),
            max_connections: server.max_connections,
            limits: ConnectionLimits {
                data_wait: Duration::from_millis(server.data_wait_ms),
                settle_interval: Duration::from_millis(server.settle_interval_ms),
                max_connection_time: Duration::from_millis(server.max_connection_time_ms),
                max_request_size: server.max_request_size,
            },
            data_dir: cli.data_dir.unwrap_or(toml_config.ledger.data_dir),
            opening_balance: toml_config.ledger.opening_balance,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.server.settle_interval_ms, 100);
        assert_eq!(config.server.max_request_size, 16 * 1024 * 1024);
        assert_eq!(config.ledger.data_dir, PathBuf::from("./data"));
        assert_eq!(config.ledger.opening_balance, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9000"
            workers = 4
            data_wait_ms = 500

            [ledger]
            data_dir = "/var/lib/ledgerd"
            opening_balance = 250

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.data_wait_ms, 500);
        assert_eq!(config.server.max_connection_time_ms, 60_000);
        assert_eq!(config.ledger.data_dir, PathBuf::from("/var/lib/ledgerd"));
        assert_eq!(config.ledger.opening_balance, 250);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:9000"
            settle_interval_ms = 250

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let cli = CliArgs::parse_from([
            "ledgerd",
            "--listen",
            "127.0.0.1:7000",
            "--data-dir",
            "/tmp/ledgerd",
            "--log-level",
            "trace",
        ]);

        let config = Config::merge(cli, file);
        assert_eq!(config.listen, "127.0.0.1:7000");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledgerd"));
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.limits.settle_interval, Duration::from_millis(250));
        assert_eq!(config.workers, None);
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::parse_from(["ledgerd", "--config", "/nonexistent/ledgerd.toml"]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::FileRead(..))
        ));
    }
}
