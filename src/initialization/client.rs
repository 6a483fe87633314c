//! HTTP client initialization.
//!
//! Each external dependency gets its own client so that timeouts match the
//! call: the reachability probe is short, the geolocation API moderate and the
//! bulk dataset download long.

use std::time::Duration;

use reqwest::ClientBuilder;

/// User-Agent sent on every outgoing request.
pub const USER_AGENT: &str = concat!("peer_map/", env!("CARGO_PKG_VERSION"));

/// Initializes an HTTP client with the given total request timeout.
///
/// # Errors
///
/// Returns a `reqwest::Error` if client creation fails.
pub fn init_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .user_agent(USER_AGENT)
        .build()
}

/// Initializes the client used for reachability probes.
///
/// Redirects are not followed: any answer from the probe host proves the
/// network path works.
pub fn init_probe_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}
