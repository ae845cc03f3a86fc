//! Configuration for the echo server.
//!
//! Same layering as the client: command line (or `LINKPROBE_*`
//! environment variables) over an optional TOML file over defaults.
//!
//! - `addr`          (default: ":8123", i.e. every interface)
//! - `protocols`     (default: tcp and udp)
//! - `buffer_size`   (default: 512)
//! - `read_timeout`  (default: 2000 ms)
//! - `write_timeout` (default: 5000 ms)
//! - `drain_timeout` (default: unbounded)

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use linkprobe_net::Protocol;
use serde::Deserialize;
use thiserror::Error;

use crate::echo::EchoHandler;

#[derive(Parser, Debug, Default)]
#[command(name = "linkprobe-server")]
#[command(about = "Echo server for linkprobe clients", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, env = "LINKPROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g., :8123 or 127.0.0.1:8123)
    #[arg(short, long, env = "LINKPROBE_ADDR")]
    pub addr: Option<String>,

    /// Transports to serve; repeat or comma-separate (tcp, udp)
    #[arg(short, long, env = "LINKPROBE_PROTOCOLS", value_delimiter = ',')]
    pub protocols: Option<Vec<Protocol>>,

    /// Receive buffer size in bytes
    #[arg(long, env = "LINKPROBE_BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// Deadline for each read, in milliseconds
    #[arg(long, env = "LINKPROBE_READ_TIMEOUT")]
    pub read_timeout: Option<u64>,

    /// Deadline for each write, in milliseconds
    #[arg(long, env = "LINKPROBE_WRITE_TIMEOUT")]
    pub write_timeout: Option<u64>,

    /// Longest wait for open connections on shutdown, in milliseconds
    #[arg(long, env = "LINKPROBE_DRAIN_TIMEOUT")]
    pub drain_timeout: Option<u64>,

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

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_protocols")]
    pub protocols: Vec<Protocol>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    pub drain_timeout: Option<u64>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            protocols: default_protocols(),
            buffer_size: default_buffer_size(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            drain_timeout: None,
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

fn default_addr() -> String {
    ":8123".to_string()
}

fn default_protocols() -> Vec<Protocol> {
    vec![Protocol::Tcp, Protocol::Udp]
}

fn default_buffer_size() -> usize {
    512
}

fn default_read_timeout() -> u64 {
    2000
}

fn default_write_timeout() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address to bind, with an empty host already expanded.
    pub addr: String,
    pub protocols: Vec<Protocol>,
    pub buffer_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub drain_timeout: Option<Duration>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
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
        let server = file.server;

        let mut protocols = cli.protocols.unwrap_or(server.protocols);
        protocols.sort_by_key(|p| p.as_str());
        protocols.dedup();
        if protocols.is_empty() {
            return Err(ConfigError::Invalid("at least one protocol must be served"));
        }

        let buffer_size = cli.buffer_size.unwrap_or(server.buffer_size);
        if buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer size must be greater than zero"));
        }

        Ok(Config {
            addr: expand_addr(&cli.addr.unwrap_or(server.addr)),
            protocols,
            buffer_size,
            read_timeout: Duration::from_millis(cli.read_timeout.unwrap_or(server.read_timeout)),
            write_timeout: Duration::from_millis(cli.write_timeout.unwrap_or(server.write_timeout)),
            drain_timeout: cli.drain_timeout.or(server.drain_timeout).map(Duration::from_millis),
            log_level: cli.log_level.unwrap_or(file.logging.level),
            log_format: cli.log_format.unwrap_or(file.logging.format),
        })
    }

    pub fn echo_handler(&self) -> EchoHandler {
        EchoHandler::new(self.buffer_size, self.read_timeout, self.write_timeout)
    }
}

/// `":8123"` means every interface.
fn expand_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr.to_string(),
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
