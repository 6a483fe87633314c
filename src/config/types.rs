//! Configuration types and CLI options.
//!
//! This module defines enums and structs used for command-line argument parsing
//! and configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::constants::*;

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted:
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Bitcoin network the node runs on. Selects the bitcoin-cli chain flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChainNetwork {
    /// Mainnet (no flag)
    Main,
    /// `-testnet`
    Test,
    /// `-signet`
    Signet,
    /// `-regtest`
    Regtest,
}

impl ChainNetwork {
    /// The bitcoin-cli flag for this network, if any.
    pub fn cli_flag(self) -> Option<&'static str> {
        match self {
            ChainNetwork::Main => None,
            ChainNetwork::Test => Some("-testnet"),
            ChainNetwork::Signet => Some("-signet"),
            ChainNetwork::Regtest => Some("-regtest"),
        }
    }
}

/// Monitor configuration.
///
/// Parsed from the command line (and `PEER_MAP_*` environment variables) by the
/// binary, or built programmatically from `Config::default()` by library users.
///
/// # Examples
///
/// ```no_run
/// use peer_map::Config;
///
/// let config = Config {
///     geo_db_only: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Parser)]
#[command(
    name = "peer_map",
    about = "Monitors a Bitcoin node's peers, their locations and the host's network health."
)]
pub struct Config {
    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Info, env = "PEER_MAP_LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Log format: plain|json
    #[arg(long, value_enum, default_value_t = LogFormat::Plain, env = "PEER_MAP_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Path to the bitcoin-cli executable
    #[arg(long, default_value = "bitcoin-cli", env = "PEER_MAP_CLI_PATH")]
    pub cli_path: String,

    /// Node data directory passed to bitcoin-cli as -datadir
    #[arg(long, env = "PEER_MAP_DATADIR")]
    pub datadir: Option<String>,

    /// Node config file passed to bitcoin-cli as -conf
    #[arg(long, env = "PEER_MAP_CONF")]
    pub conf: Option<String>,

    /// Bitcoin network: main|test|signet|regtest
    #[arg(long, value_enum, default_value_t = ChainNetwork::Main, env = "PEER_MAP_NETWORK")]
    pub network: ChainNetwork,

    /// Persistent geolocation database (SQLite file)
    #[arg(long, default_value = DEFAULT_GEO_DB_PATH, env = "PEER_MAP_GEO_DB_PATH")]
    pub geo_db_path: PathBuf,

    /// Disable the persistent geolocation database (session cache + API only)
    #[arg(long, env = "PEER_MAP_NO_GEO_DB")]
    pub no_geo_db: bool,

    /// Start in database-only mode (never call the geolocation API)
    #[arg(long, env = "PEER_MAP_GEO_DB_ONLY")]
    pub geo_db_only: bool,

    /// Geolocation API base URL
    #[arg(long, default_value = DEFAULT_GEO_API_URL, env = "PEER_MAP_GEO_API_URL")]
    pub geo_api_url: String,

    /// Minimum delay between geolocation API calls, in milliseconds
    #[arg(long, default_value_t = GEO_API_DELAY_MS, env = "PEER_MAP_GEO_API_DELAY_MS")]
    pub geo_api_delay_ms: u64,

    /// Bulk geolocation dataset URL
    #[arg(long, default_value = DEFAULT_GEO_DATASET_URL, env = "PEER_MAP_GEO_DATASET_URL")]
    pub geo_dataset_url: String,

    /// Download and merge the bulk geolocation dataset at startup
    #[arg(long, env = "PEER_MAP_UPDATE_GEO_DB")]
    pub update_geo_db: bool,

    /// Seconds between peer refreshes
    #[arg(long, default_value_t = REFRESH_INTERVAL_SECS, env = "PEER_MAP_REFRESH_INTERVAL_SECS")]
    pub refresh_interval_secs: u64,

    /// Refresh the addrman cache every N peer refreshes
    #[arg(long, default_value_t = ADDRMAN_REFRESH_EVERY, env = "PEER_MAP_ADDRMAN_REFRESH_EVERY")]
    pub addrman_refresh_every: u32,

    /// URL used as the internet reachability probe
    #[arg(long, default_value = DEFAULT_PROBE_URL, env = "PEER_MAP_PROBE_URL")]
    pub probe_url: String,

    /// Assume the host starts without internet access
    #[arg(long, env = "PEER_MAP_OFFLINE_START")]
    pub offline_start: bool,

    /// System stats sampling interval in milliseconds
    #[arg(long, default_value_t = STATS_INTERVAL_MS, env = "PEER_MAP_STATS_INTERVAL_MS")]
    pub stats_interval_ms: u64,

    /// Fiat currency for the BTC spot price
    #[arg(long, default_value = DEFAULT_PRICE_CURRENCY, env = "PEER_MAP_PRICE_CURRENCY")]
    pub price_currency: String,

    /// Spot price API base URL
    #[arg(long, default_value = DEFAULT_PRICE_API_URL, env = "PEER_MAP_PRICE_API_URL")]
    pub price_api_url: String,

    /// Seconds between spot price refreshes (0 disables the price loop)
    #[arg(long, default_value_t = PRICE_INTERVAL_SECS, env = "PEER_MAP_PRICE_INTERVAL_SECS")]
    pub price_interval_secs: u64,
}

impl Config {
    /// Peer refresh tick.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    /// Minimum spacing between geolocation API calls.
    pub fn geo_api_delay(&self) -> Duration {
        Duration::from_millis(self.geo_api_delay_ms)
    }

    /// Stats sampler tick.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(10))
    }

    /// Directory for temporary downloads, next to the geo database.
    pub fn tmp_dir(&self) -> PathBuf {
        self.geo_db_path
            .parent()
            .map(|p| p.join("tmp"))
            .unwrap_or_else(|| PathBuf::from("tmp"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            cli_path: "bitcoin-cli".to_string(),
            datadir: None,
            conf: None,
            network: ChainNetwork::Main,
            geo_db_path: PathBuf::from(DEFAULT_GEO_DB_PATH),
            no_geo_db: false,
            geo_db_only: false,
            geo_api_url: DEFAULT_GEO_API_URL.to_string(),
            geo_api_delay_ms: GEO_API_DELAY_MS,
            geo_dataset_url: DEFAULT_GEO_DATASET_URL.to_string(),
            update_geo_db: false,
            refresh_interval_secs: REFRESH_INTERVAL_SECS,
            addrman_refresh_every: ADDRMAN_REFRESH_EVERY,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            offline_start: false,
            stats_interval_ms: STATS_INTERVAL_MS,
            price_currency: DEFAULT_PRICE_CURRENCY.to_string(),
            price_api_url: DEFAULT_PRICE_API_URL.to_string(),
            price_interval_secs: PRICE_INTERVAL_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(
            log::LevelFilter::from(LogLevel::Error),
            log::LevelFilter::Error
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Warn),
            log::LevelFilter::Warn
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Info),
            log::LevelFilter::Info
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Debug),
            log::LevelFilter::Debug
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Trace),
            log::LevelFilter::Trace
        );
    }

    #[test]
    fn test_chain_network_flags() {
        assert_eq!(ChainNetwork::Main.cli_flag(), None);
        assert_eq!(ChainNetwork::Test.cli_flag(), Some("-testnet"));
        assert_eq!(ChainNetwork::Signet.cli_flag(), Some("-signet"));
        assert_eq!(ChainNetwork::Regtest.cli_flag(), Some("-regtest"));
    }

    #[test]
    fn test_config_default_matches_cli_defaults() {
        // Parsing an empty command line must produce the same values as Default
        let parsed = Config::try_parse_from(["peer_map"]).expect("empty args should parse");
        let default = Config::default();
        assert_eq!(parsed.refresh_interval_secs, default.refresh_interval_secs);
        assert_eq!(parsed.addrman_refresh_every, default.addrman_refresh_every);
        assert_eq!(parsed.geo_api_delay_ms, default.geo_api_delay_ms);
        assert_eq!(parsed.geo_db_path, default.geo_db_path);
        assert_eq!(parsed.stats_interval_ms, default.stats_interval_ms);
        assert_eq!(parsed.network, default.network);
        assert!(!parsed.offline_start);
    }

    #[test]
    fn test_config_parses_overrides() {
        let parsed = Config::try_parse_from([
            "peer_map",
            "--network",
            "signet",
            "--geo-db-only",
            "--refresh-interval-secs",
            "5",
            "--datadir",
            "/srv/btc",
        ])
        .expect("args should parse");
        assert_eq!(parsed.network, ChainNetwork::Signet);
        assert!(parsed.geo_db_only);
        assert_eq!(parsed.refresh_interval(), Duration::from_secs(5));
        assert_eq!(parsed.datadir.as_deref(), Some("/srv/btc"));
    }

    #[test]
    fn test_tmp_dir_sits_next_to_geo_db() {
        let config = Config {
            geo_db_path: PathBuf::from("/var/lib/peer_map/geo.db"),
            ..Default::default()
        };
        assert_eq!(config.tmp_dir(), PathBuf::from("/var/lib/peer_map/tmp"));
    }
}
