//! Configuration constants.
//!
//! This module defines the timing and threshold constants used by the background
//! workers. The CLI defaults in `types.rs` are built from these values.

use std::time::Duration;

// Peer refresh
/// Seconds between peer snapshot refreshes
pub const REFRESH_INTERVAL_SECS: u64 = 10;
/// Refresh the addrman cache every N peer ticks (6 x 10s = ~60s)
pub const ADDRMAN_REFRESH_EVERY: u32 = 6;
/// How long connect/disconnect events stay in the recent-changes list
pub const RECENT_CHANGES_WINDOW: Duration = Duration::from_secs(20);
/// Timeout for a single bitcoin-cli invocation
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);

// Connectivity
/// Consecutive successful operations required to return to green
pub const CONSECUTIVE_SUCCESSES_FOR_GREEN: u32 = 4;
/// Continuous failure time after which yellow escalates to red
pub const YELLOW_TO_RED_AFTER: Duration = Duration::from_secs(10);
/// Reachability probe timeout. Also the natural probe cadence early in an outage.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Outage length after which the probe loop slows down
pub const PROBE_THROTTLE_AFTER: Duration = Duration::from_secs(60);
/// Probe interval once throttled
pub const PROBE_THROTTLED_INTERVAL: Duration = Duration::from_secs(10);
/// Default reachability probe target
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com";

// Geolocation
/// Default geolocation API base URL
pub const DEFAULT_GEO_API_URL: &str = "http://ip-api.com/json";
/// Fields requested from the geolocation API
pub const GEO_API_FIELDS: &str = "status,continent,continentCode,country,countryCode,region,regionName,city,district,zip,lat,lon,timezone,offset,currency,isp,org,as,asname,mobile,proxy,hosting";
/// Timeout for a single geolocation API call
pub const GEO_API_TIMEOUT: Duration = Duration::from_secs(10);
/// Minimum delay between external geolocation API calls, in milliseconds
pub const GEO_API_DELAY_MS: u64 = 1500;
/// How long the geo worker waits on an empty queue before checking the offline retry list
pub const GEO_IDLE_POLL: Duration = Duration::from_millis(500);
/// Consecutive API failures after which the API is reported as unavailable
pub const API_UNAVAILABLE_AFTER: u32 = 5;
/// Default location of the persistent geolocation database
pub const DEFAULT_GEO_DB_PATH: &str = "./data/geo.db";
/// Default bulk geolocation dataset
pub const DEFAULT_GEO_DATASET_URL: &str =
    "https://raw.githubusercontent.com/mbhillrn/Bitcoin-Node-GeoIP-Dataset/main/geo.db";
/// Timeout for the bulk dataset download
pub const DATASET_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

// Persistent store failure handling
/// Consecutive read (or write) failures before that access is disabled
pub const STORE_FAILURE_THRESHOLD: u32 = 5;
/// How long a disabled store access stays off
pub const STORE_COOLDOWN: Duration = Duration::from_secs(60);

// Retry strategy (bulk dataset download)
/// Initial delay in milliseconds before first retry
pub const RETRY_INITIAL_DELAY_MS: u64 = 500;
/// Factor by which retry delay is multiplied on each attempt
pub const RETRY_FACTOR: u64 = 2;
/// Maximum delay between retries in seconds
pub const RETRY_MAX_DELAY_SECS: u64 = 15;
/// Maximum number of retries after the initial attempt
pub const RETRY_MAX_ATTEMPTS: usize = 2;

// System stats
/// Stats sampler tick in milliseconds
pub const STATS_INTERVAL_MS: u64 = 200;

// Notifications
/// How long an observer waits before receiving a keepalive
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(2);

// Price
/// Default fiat currency for the spot price
pub const DEFAULT_PRICE_CURRENCY: &str = "USD";
/// Default spot price API base URL
pub const DEFAULT_PRICE_API_URL: &str = "https://api.coinbase.com/v2/prices";
/// Timeout for a spot price request
pub const PRICE_TIMEOUT: Duration = Duration::from_secs(5);
/// Seconds between background price refreshes
pub const PRICE_INTERVAL_SECS: u64 = 60;
