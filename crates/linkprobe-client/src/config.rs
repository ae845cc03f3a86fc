//! Client configuration.
//!
//! Options come from the command line (or the matching `LINKPROBE_*`
//! environment variables) and an optional TOML file. A value given on
//! the command line wins over the file, which wins over the default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use linkprobe_net::Protocol;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineConfig;

#[derive(Parser, Debug, Default)]
#[command(name = "linkprobe-client")]
#[command(about = "Measure round-trip latency and loss against an echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, env = "LINKPROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Transport to use (tcp, udp)
    #[arg(short, long, env = "LINKPROBE_PROTOCOL")]
    pub protocol: Option<Protocol>,

    /// Server address (e.g., 127.0.0.1:8123)
    #[arg(short, long, env = "LINKPROBE_ADDR")]
    pub addr: Option<String>,

    /// Wait before redialing, in milliseconds
    #[arg(long, env = "LINKPROBE_BACKOFF")]
    pub backoff: Option<u64>,

    /// Time between probes, in milliseconds
    #[arg(short, long, env = "LINKPROBE_INTERVAL")]
    pub interval: Option<u64>,

    /// Deadline for each response, in milliseconds
    #[arg(long, env = "LINKPROBE_READ_TIMEOUT")]
    pub read_timeout: Option<u64>,

    /// Deadline for each probe write, in milliseconds
    #[arg(long, env = "LINKPROBE_WRITE_TIMEOUT")]
    pub write_timeout: Option<u64>,

    /// Receive buffer size in bytes
    #[arg(long, env = "LINKPROBE_BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LINKPROBE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, env = "LINKPROBE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    #[serde(default)]
    pub protocol: Protocol,
    pub addr: Option<String>,
    #[serde(default = "default_backoff")]
    pub backoff: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            addr: None,
            backoff: default_backoff(),
            interval: default_interval(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_backoff() -> u64 {
    1000
}

fn default_interval() -> u64 {
    1000
}

fn default_read_timeout() -> u64 {
    2000
}

fn default_write_timeout() -> u64 {
    5000
}

fn default_buffer_size() -> usize {
    1500
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub protocol: Protocol,
    pub addr: String,
    pub backoff: Duration,
    pub interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config {
            Some(ref path) => read_toml(path)?,
            None => TomlConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: CliArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let client = file.client;
        let config = Config {
            protocol: cli.protocol.unwrap_or(client.protocol),
            addr: cli.addr.or(client.addr).ok_or(ConfigError::MissingAddr)?,
            backoff: millis(cli.backoff.unwrap_or(client.backoff)),
            interval: millis(cli.interval.unwrap_or(client.interval)),
            read_timeout: millis(cli.read_timeout.unwrap_or(client.read_timeout)),
            write_timeout: millis(cli.write_timeout.unwrap_or(client.write_timeout)),
            buffer_size: cli.buffer_size.unwrap_or(client.buffer_size),
            log_level: cli.log_level.unwrap_or(file.logging.level),
            log_format: cli.log_format.unwrap_or(file.logging.format),
        };

        config.engine_config().validate()?;
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            backoff: self.backoff,
            send_interval: self.interval,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            buffer_size: self.buffer_size,
        }
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, toml::de::Error),

    #[error("no server address given (use --addr or client.addr)")]
    MissingAddr,

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
