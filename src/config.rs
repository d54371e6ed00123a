//! Configuration management for the sealer
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON) with validation and defaults.

use crate::engine::SealMode;
use crate::worker::AcceleratorConfig;
use crate::{Error, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use std::ffi::OsString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Seal worker types
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerType {
    /// Multi-threaded CPU search
    Cpu,
    /// External accelerator over TCP
    Accelerator,
    /// Instant sealing for testing
    Fake,
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerType::Cpu => write!(f, "cpu"),
            WorkerType::Accelerator => write!(f, "accelerator"),
            WorkerType::Fake => write!(f, "fake"),
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Complete sealer configuration
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "x11-sealer",
    version = env!("CARGO_PKG_VERSION"),
    about = "Coin-age weighted X11 proof-of-work sealer",
    long_about = "Seals block headers with an 11-algorithm hash chain, using \
                  local CPU threads or an external accelerator device"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(default)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Seal worker type
    #[arg(short = 'w', long, default_value = "cpu")]
    #[serde(default = "default_worker")]
    pub worker: WorkerType,

    /// Number of search threads (0 = one per CPU, negative disables local
    /// search)
    #[arg(short = 'c', long, default_value = "0", allow_hyphen_values = true)]
    #[serde(default)]
    pub thread_count: i32,

    /// Accelerator command address
    #[arg(long, default_value = "127.0.0.1:9656")]
    #[serde(default = "default_accelerator_addr")]
    pub accelerator_addr: String,

    /// Reply listener interface
    #[arg(long, default_value = "127.0.0.1")]
    #[serde(default = "default_reply_interface")]
    pub reply_interface: String,

    /// Reply listener port
    #[arg(long, default_value = "9657")]
    #[serde(default = "default_reply_port")]
    pub reply_port: u16,

    /// Delay before attaching to the accelerator, in milliseconds
    #[arg(long, default_value = "2000")]
    #[serde(default = "default_attach_delay")]
    pub attach_delay_ms: u64,

    /// Coinbase address for the demo template
    #[arg(short = 'a', long, default_value = "0x0000000000000000000000000000000000000000")]
    #[serde(default = "default_coinbase")]
    pub coinbase: String,

    /// Difficulty for the demo template
    #[arg(short = 'd', long, default_value = "131072")]
    #[serde(default = "default_difficulty")]
    pub difficulty: String,

    /// Coinbase balance presented to coin-age accrual, in wei
    #[arg(long, default_value = "0")]
    #[serde(default = "default_balance")]
    pub balance: String,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

fn default_worker() -> WorkerType {
    WorkerType::Cpu
}

fn default_accelerator_addr() -> String {
    "127.0.0.1:9656".to_string()
}

fn default_reply_interface() -> String {
    "127.0.0.1".to_string()
}

fn default_reply_port() -> u16 {
    9657
}

fn default_attach_delay() -> u64 {
    2000
}

fn default_coinbase() -> String {
    "0x0000000000000000000000000000000000000000".to_string()
}

fn default_difficulty() -> String {
    "131072".to_string()
}

fn default_balance() -> String {
    "0".to_string()
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Config {
    /// Load configuration from arguments, then merge the config file if one
    /// is given
    pub async fn load() -> Result<Self> {
        Self::load_from(std::env::args_os()).await
    }

    /// Load from an explicit argument list
    pub async fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().get_matches_from(args);
        let mut config =
            Self::from_arg_matches(&matches).map_err(|e| Error::config(e.to_string()))?;
        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config = config.merge_with_file(file_config, &matches);
        }
        config.validate()?;
        Ok(config)
    }

    async fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Explicit CLI values take precedence; arguments left at their clap
    /// default fall back to the config file
    fn merge_with_file(mut self, file_config: Self, matches: &ArgMatches) -> Self {
        fn defaulted(matches: &ArgMatches, id: &str) -> bool {
            !matches!(matches.value_source(id), Some(ValueSource::CommandLine))
        }

        if defaulted(matches, "worker") {
            self.worker = file_config.worker;
        }
        if defaulted(matches, "thread_count") {
            self.thread_count = file_config.thread_count;
        }
        if defaulted(matches, "accelerator_addr") {
            self.accelerator_addr = file_config.accelerator_addr;
        }
        if defaulted(matches, "reply_interface") {
            self.reply_interface = file_config.reply_interface;
        }
        if defaulted(matches, "reply_port") {
            self.reply_port = file_config.reply_port;
        }
        if defaulted(matches, "attach_delay_ms") {
            self.attach_delay_ms = file_config.attach_delay_ms;
        }
        if defaulted(matches, "coinbase") {
            self.coinbase = file_config.coinbase;
        }
        if defaulted(matches, "difficulty") {
            self.difficulty = file_config.difficulty;
        }
        if defaulted(matches, "balance") {
            self.balance = file_config.balance;
        }
        if defaulted(matches, "log_level") {
            self.log_level = file_config.log_level;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.coinbase()?;
        self.difficulty_value()?;
        self.balance_value()?;

        self.accelerator_addr
            .parse::<SocketAddr>()
            .map_err(|e| Error::config(format!("Invalid accelerator address: {}", e)))?;

        if self.reply_interface.parse::<IpAddr>().is_err() {
            return Err(Error::config("Invalid reply interface address"));
        }

        Ok(())
    }

    /// Parsed coinbase address
    pub fn coinbase(&self) -> Result<crate::types::Address> {
        self.coinbase.parse()
    }

    /// Parsed demo difficulty
    pub fn difficulty_value(&self) -> Result<num_bigint::BigUint> {
        self.difficulty
            .parse()
            .map_err(|e| Error::config(format!("Invalid difficulty: {}", e)))
    }

    /// Parsed coinbase balance
    pub fn balance_value(&self) -> Result<num_bigint::BigUint> {
        self.balance
            .parse()
            .map_err(|e| Error::config(format!("Invalid balance: {}", e)))
    }

    /// Reply listener socket address
    pub fn reply_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .reply_interface
            .parse()
            .map_err(|e| Error::config(format!("Invalid reply interface: {}", e)))?;
        Ok(SocketAddr::new(ip, self.reply_port))
    }

    /// Seal mode for the engine
    pub fn seal_mode(&self) -> SealMode {
        match self.worker {
            WorkerType::Cpu => SealMode::Cpu,
            WorkerType::Accelerator => SealMode::Accelerator(AcceleratorConfig {
                command_addr: self.accelerator_addr.clone(),
                attach_delay: Duration::from_millis(self.attach_delay_ms),
            }),
            WorkerType::Fake => SealMode::Fake,
        }
    }
}
