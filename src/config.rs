//! Configuration management for the mining pool
//!
//! Settings are layered: built-in defaults, then an optional YAML/JSON file,
//! then `POOL__SECTION__KEY` environment variables, then command line flags.
//! The result is validated once and shared read-only by every component.

use crate::wallet::is_valid_address;
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

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

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level: tracing::Level = (*self).into();
        write!(f, "{}", level.as_str().to_lowercase())
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

/// Command-line arguments
#[derive(Debug, Clone, Parser)]
#[command(
    name = "mining-pool",
    version = env!("CARGO_PKG_VERSION"),
    about = "Stratum mining pool engine",
    long_about = "A mining pool that measures each worker with synthetic jobs, tunes per-worker difficulty and pays miners in proportion to their integrated hashrate"
)]
pub struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short = 'c', long, value_name = "FILE", env = "POOL_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Stratum server interface
    #[arg(long)]
    pub stratum_interface: Option<String>,

    /// Stratum server port
    #[arg(short = 'p', long)]
    pub stratum_port: Option<u16>,

    /// Chain node base URL
    #[arg(short = 'n', long, env = "POOL_NODE_URL")]
    pub node: Option<String>,

    /// Path of the JSON store snapshot
    #[arg(long, value_name = "FILE")]
    pub store_path: Option<PathBuf>,

    /// Log level
    #[arg(short = 'l', long)]
    pub log_level: Option<LogLevel>,

    /// Log format
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub print_config: bool,

    /// Generate a payout wallet seed and exit
    #[arg(long)]
    pub generate_key: bool,
}

/// Complete configuration for the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PoolConfig {
    pub stratum: StratumConfig,
    pub lifecycle: LifecycleConfig,
    pub inspector: InspectorConfig,
    pub blacklist: BlacklistConfig,
    pub fees: FeeConfig,
    pub banker: BankerConfig,
    pub intervals: IntervalConfig,
    pub node: NodeConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Stratum listener and identity settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratumConfig {
    pub interface: String,
    pub port: u16,
    pub max_connections: usize,
    /// Outstanding jobs remembered per registry
    pub job_buffer: usize,
    /// Keep the remote IP in the worker identity key
    pub identity_includes_ip: bool,
    /// Payout address for miners that log in without a valid one
    pub free_miner_address: String,
    /// Address that is remapped to the free miner address
    pub donation_address: Option<String>,
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self {
            interface: "0.0.0.0".to_string(),
            port: 9081,
            max_connections: 10_000,
            job_buffer: 10,
            identity_includes_ip: true,
            free_miner_address: "H0000000000000000000000000000000000000000".to_string(),
            donation_address: None,
        }
    }
}

/// Worker probation and re-verification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub num_intern_problems: u32,
    pub num_interview_problems: u32,
    pub num_dayoff_problems: u32,
    /// Every Nth real job dispatch sends a working miner on a day-off
    pub freq_dayoff: u32,
    /// Hashrate assumed for a brand new worker (H/s)
    pub initial_hashrate: f64,
    /// Workers measured below this hashrate (H/s) are banned
    pub min_hashrate: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            num_intern_problems: 20,
            num_interview_problems: 20,
            num_dayoff_problems: 1,
            freq_dayoff: 100,
            initial_hashrate: 200.0,
            min_hashrate: 30.0,
        }
    }
}

/// One probation stage of the difficulty regulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbationProfile {
    /// Desired median solve time
    #[serde(with = "duration_str")]
    pub median_time: Duration,
    /// EMA smoothing factor
    pub alpha: f64,
}

impl ProbationProfile {
    /// Mean solve time whose exponential distribution has `median_time` as
    /// its median, in seconds
    pub fn target_time(&self) -> f64 {
        self.median_time.as_secs_f64() / std::f64::consts::LN_2
    }
}

/// Difficulty regulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    pub intern: ProbationProfile,
    pub interview: ProbationProfile,
    /// Shortest solve time taken into account, as a multiple of the target
    pub min_sigma: f64,
    /// Longest solve time taken into account, as a multiple of the target
    pub max_sigma: f64,
    /// Amount subtracted from alpha after each update; zero keeps it fixed
    pub alpha_decay: f64,
    pub alpha_floor: f64,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            intern: ProbationProfile {
                median_time: Duration::from_secs(20),
                alpha: 0.3,
            },
            interview: ProbationProfile {
                median_time: Duration::from_secs(20),
                alpha: 0.1,
            },
            min_sigma: 0.1,
            max_sigma: 5.0,
            alpha_decay: 0.0,
            alpha_floor: 0.01,
        }
    }
}

/// Offense scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// Scores above this ban the connection
    pub threshold: u32,
    /// Score given to a worker measured below the minimum hashrate
    pub ban_penalty: u32,
    /// Fraction of each stored score kept per collector pass
    pub decay: f64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            threshold: 30,
            ban_penalty: 100,
            decay: 0.999,
        }
    }
}

/// Time-decayed pool fee settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub initial_fee: f64,
    pub min_fee: f64,
    #[serde(with = "duration_str")]
    pub half_life: Duration,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            initial_fee: 0.029,
            min_fee: 0.0029,
            half_life: Duration::from_secs(3600),
        }
    }
}

/// Each cofounder receives this fraction of the collected pool fee
pub const COFOUNDER_SHARE: f64 = 0.5;

/// Cofounders the fee share can be split between
pub const MAX_COFOUNDERS: usize = 2;

/// Reward distribution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankerConfig {
    pub enabled: bool,
    /// Income of one mined block
    pub block_income: f64,
    /// Flat fee paid with every transfer
    pub tx_fee: f64,
    /// Blocks on top of a mined block before it is paid out
    pub confirmations: u64,
    /// Addresses sharing the collected pool fee
    pub cofounders: Vec<String>,
    /// Hex ed25519 seed of the pool wallet
    pub wallet_seed: Option<String>,
}

impl Default for BankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_income: 240.0,
            tx_fee: 0.000_000_001,
            confirmations: 50,
            cofounders: Vec::new(),
            wallet_seed: None,
        }
    }
}

/// Periods of the background loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    #[serde(with = "duration_str")]
    pub release: Duration,
    #[serde(with = "duration_str")]
    pub patrol: Duration,
    #[serde(with = "duration_str")]
    pub collector: Duration,
    #[serde(with = "duration_str")]
    pub payout: Duration,
    #[serde(with = "duration_str")]
    pub block_status: Duration,
    #[serde(with = "duration_str")]
    pub poll_work: Duration,
    #[serde(with = "duration_str")]
    pub store_flush: Duration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            release: Duration::from_secs(10),
            patrol: Duration::from_secs(300),
            collector: Duration::from_secs(2),
            payout: Duration::from_secs(10),
            block_status: Duration::from_secs(600),
            poll_work: Duration::from_millis(100),
            store_flush: Duration::from_secs(30),
        }
    }
}

/// Chain node connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub url: String,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub max_retries: usize,
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,
    #[serde(with = "duration_str")]
    pub max_retry_delay: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:2442/api/".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 10,
            retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Durable store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file; the store stays in memory only when unset
    pub path: Option<PathBuf>,
    /// How long a disconnected worker with nothing owed is remembered
    #[serde(with = "duration_str")]
    pub worker_retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            worker_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Stats API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub interface: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Directory for daily rotated log files
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Plain,
            directory: None,
        }
    }
}

impl PoolConfig {
    /// Build the configuration from every source and validate it
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&PoolConfig::default())?);

        if let Some(path) = &args.config_file {
            builder = builder.add_source(::config::File::from(path.as_path()));
        }

        let mut pool_config: PoolConfig = builder
            .add_source(
                ::config::Environment::with_prefix("POOL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        pool_config.apply_args(args);
        pool_config.validate()?;
        Ok(pool_config)
    }

    /// Command line flags take precedence over every other source
    fn apply_args(&mut self, args: &Args) {
        if let Some(interface) = &args.stratum_interface {
            self.stratum.interface = interface.clone();
        }
        if let Some(port) = args.stratum_port {
            self.stratum.port = port;
        }
        if let Some(node) = &args.node {
            self.node.url = node.clone();
        }
        if let Some(path) = &args.store_path {
            self.store.path = Some(path.clone());
        }
        if let Some(level) = args.log_level {
            self.logging.level = level;
        }
        if let Some(format) = args.log_format {
            self.logging.format = format;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.stratum.interface.parse::<IpAddr>().is_err() {
            return Err(Error::config("Invalid stratum interface address"));
        }
        if self.api.interface.parse::<IpAddr>().is_err() {
            return Err(Error::config("Invalid API interface address"));
        }
        if self.stratum.job_buffer == 0 {
            return Err(Error::config("Job buffer must be greater than 0"));
        }
        if !is_valid_address(&self.stratum.free_miner_address) {
            return Err(Error::config(format!(
                "Invalid free miner address: {}",
                self.stratum.free_miner_address
            )));
        }

        if self.lifecycle.freq_dayoff == 0 {
            return Err(Error::config("Day-off frequency must be greater than 0"));
        }
        if self.lifecycle.num_dayoff_problems == 0 || self.lifecycle.num_interview_problems == 0 {
            return Err(Error::config(
                "Interview and day-off stages need at least one problem",
            ));
        }
        if !(self.lifecycle.initial_hashrate > 0.0) {
            return Err(Error::config("Initial hashrate must be positive"));
        }

        for (name, profile) in [
            ("intern", &self.inspector.intern),
            ("interview", &self.inspector.interview),
        ] {
            if profile.median_time.is_zero() {
                return Err(Error::config(format!("{} median time must be positive", name)));
            }
            if !(profile.alpha > 0.0 && profile.alpha <= 1.0) {
                return Err(Error::config(format!("{} alpha must be in (0, 1]", name)));
            }
        }
        if !(self.inspector.min_sigma > 0.0 && self.inspector.min_sigma < self.inspector.max_sigma)
        {
            return Err(Error::config("Regulator sigmas must satisfy 0 < min < max"));
        }
        if self.inspector.alpha_decay < 0.0 || !(self.inspector.alpha_floor > 0.0) {
            return Err(Error::config("Alpha decay must be >= 0 and floor > 0"));
        }

        if !(0.0..=1.0).contains(&self.blacklist.decay) {
            return Err(Error::config("Blacklist decay must be in [0, 1]"));
        }
        if !(0.0..1.0).contains(&self.fees.initial_fee) || self.fees.min_fee > self.fees.initial_fee
        {
            return Err(Error::config("Fees must satisfy 0 <= min <= initial < 1"));
        }

        if self.banker.block_income < 0.0 || self.banker.tx_fee < 0.0 {
            return Err(Error::config("Block income and tx fee must be non-negative"));
        }
        if self.banker.cofounders.len() > MAX_COFOUNDERS {
            return Err(Error::config(format!(
                "At most {} cofounders share the pool fee",
                MAX_COFOUNDERS
            )));
        }
        for address in &self.banker.cofounders {
            if !is_valid_address(address) {
                return Err(Error::config(format!("Invalid cofounder address: {}", address)));
            }
        }

        Url::parse(&self.node.url)
            .map_err(|e| Error::config(format!("Invalid node URL: {}", e)))?;

        let intervals = &self.intervals;
        for (name, interval) in [
            ("release", intervals.release),
            ("patrol", intervals.patrol),
            ("collector", intervals.collector),
            ("payout", intervals.payout),
            ("block_status", intervals.block_status),
            ("poll_work", intervals.poll_work),
            ("store_flush", intervals.store_flush),
        ] {
            if interval.is_zero() {
                return Err(Error::config(format!("{} interval must be positive", name)));
            }
        }

        Ok(())
    }

    /// Get stratum socket address
    pub fn stratum_socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .stratum
            .interface
            .parse()
            .map_err(|e| Error::config(format!("Invalid stratum interface: {}", e)))?;
        Ok(SocketAddr::new(ip, self.stratum.port))
    }

    /// Get stats API socket address
    pub fn api_socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .api
            .interface
            .parse()
            .map_err(|e| Error::config(format!("Invalid API interface: {}", e)))?;
        Ok(SocketAddr::new(ip, self.api.port))
    }

    /// Difficulty of the first intern job, sized so a worker running at the
    /// initial hashrate solves it in the intern target time
    pub fn intern_difficulty(&self) -> f64 {
        1.0 / (self.lifecycle.initial_hashrate * self.inspector.intern.target_time())
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(Error::from)
    }
}

/// Durations written the human way ("10s", "5m", "250ms")
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["mining-pool"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        config.validate().unwrap();
        assert_eq!(config.stratum.job_buffer, 10);
        assert_eq!(config.lifecycle.freq_dayoff, 100);
        assert_eq!(config.intervals.release, Duration::from_secs(10));
    }

    #[test]
    fn test_intern_difficulty() {
        let config = PoolConfig::default();
        let expected = 1.0 / (200.0 * 20.0 / std::f64::consts::LN_2);
        assert!((config.intern_difficulty() - expected).abs() < 1e-15);
    }

    #[test]
    fn test_load_yaml_file_and_cli_override() {
        let yaml_content = r#"
stratum:
  port: 4000
  identity_includes_ip: false
lifecycle:
  freq_dayoff: 10
inspector:
  intern:
    median_time: 5s
    alpha: 0.5
intervals:
  release: 2s 500ms
"#;
        let mut temp_file = Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();
        let path = temp_file.path().to_str().unwrap().to_string();

        let config = PoolConfig::load(&args(&["--config-file", &path, "-p", "5000"])).unwrap();

        assert_eq!(config.stratum.port, 5000);
        assert!(!config.stratum.identity_includes_ip);
        assert_eq!(config.lifecycle.freq_dayoff, 10);
        // untouched values keep their defaults
        assert_eq!(config.lifecycle.num_intern_problems, 20);
        assert_eq!(config.inspector.intern.median_time, Duration::from_secs(5));
        assert_eq!(config.inspector.interview.alpha, 0.1);
        assert_eq!(config.intervals.release, Duration::from_millis(2500));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PoolConfig::default();
        config.inspector.interview.alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = PoolConfig::default();
        config.banker.cofounders = vec!["not-an-address".into()];
        assert!(config.validate().is_err());

        let mut config = PoolConfig::default();
        config.intervals.collector = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = PoolConfig::default();
        config.stratum.interface = "localhost:1".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = PoolConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("median_time: 20s"));
        let back: PoolConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LogLevel::Trace.to_string(), "trace");
    }
}
