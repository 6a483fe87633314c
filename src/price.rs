//! BTC spot price.
//!
//! Every fetch doubles as a connectivity signal: a good answer counts as a
//! network success and a transport or HTTP failure as a network failure. An
//! answer without a price is only recorded as the last error. While
//! connectivity is red no request is made and the last known quote is served.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::connectivity::{ConnectivityMonitor, ConnectivityState};

/// A spot price as returned by the API (decimal string, unrounded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub amount: String,
    pub currency: String,
}

#[derive(Deserialize)]
struct SpotResponse {
    data: Option<SpotData>,
}

#[derive(Deserialize)]
struct SpotData {
    amount: Option<String>,
}

/// Why a price request produced no quote.
#[derive(Debug, PartialEq, Eq)]
enum FetchFailure {
    /// Transport error, non-200 status or unreadable body
    Network(String),
    /// The API answered but carried no amount
    NoAmount,
}

impl FetchFailure {
    fn message(self) -> String {
        match self {
            FetchFailure::Network(message) => message,
            FetchFailure::NoAmount => "Price API returned no amount".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct PriceState {
    last_known: Option<PriceQuote>,
    last_error: Option<String>,
}

pub struct PriceTracker {
    client: reqwest::Client,
    base_url: String,
    connectivity: Arc<ConnectivityMonitor>,
    state: Mutex<PriceState>,
}

impl PriceTracker {
    /// `client` should carry the price timeout.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        PriceTracker {
            client,
            base_url: base_url.into(),
            connectivity,
            state: Mutex::new(PriceState::default()),
        }
    }

    pub fn last_known(&self) -> Option<PriceQuote> {
        self.lock().last_known.clone()
    }

    /// Readable reason the last fetch failed, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Fetches the spot price in `currency`.
    ///
    /// Returns the fresh quote, or the last known quote for that currency when
    /// the fetch fails or is skipped.
    pub async fn fetch(&self, currency: &str) -> Option<PriceQuote> {
        if self.connectivity.state() == ConnectivityState::Red {
            debug!("Offline, serving cached price");
            return self.cached(currency);
        }

        match self.request(currency).await {
            Ok(amount) => {
                let quote = PriceQuote {
                    amount,
                    currency: currency.to_string(),
                };
                {
                    let mut state = self.lock();
                    state.last_known = Some(quote.clone());
                    state.last_error = None;
                }
                self.connectivity.on_network_success();
                Some(quote)
            }
            Err(failure) => {
                let network = matches!(failure, FetchFailure::Network(_));
                let message = failure.message();
                warn!("BTC price fetch failed: {message}");
                self.lock().last_error = Some(message);
                if network {
                    self.connectivity.on_network_failure();
                }
                self.cached(currency)
            }
        }
    }

    /// Refreshes every `interval` until cancelled.
    pub async fn run(self: Arc<Self>, currency: String, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(quote) = self.fetch(&currency).await {
                        debug!("BTC price: {} {}", quote.amount, quote.currency);
                    }
                }
            }
        }
        debug!("Price loop stopped");
    }

    async fn request(&self, currency: &str) -> Result<String, FetchFailure> {
        let url = format!(
            "{}/BTC-{}/spot",
            self.base_url.trim_end_matches('/'),
            currency
        );
        let host = self.host();

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchFailure::Network(describe_error(&e, &host)))?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchFailure::Network(format!(
                "Price API returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let body: SpotResponse = response.json().await.map_err(|_| {
            FetchFailure::Network("Price API returned an unreadable body".to_string())
        })?;
        body.data
            .and_then(|d| d.amount)
            .filter(|amount| !amount.is_empty())
            .ok_or(FetchFailure::NoAmount)
    }

    fn cached(&self, currency: &str) -> Option<PriceQuote> {
        self.last_known().filter(|quote| quote.currency == currency)
    }

    fn host(&self) -> String {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.base_url.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PriceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn describe_error(error: &reqwest::Error, host: &str) -> String {
    if error.is_timeout() {
        format!("Connection to {host} timed out")
    } else if error.is_connect() {
        format!("Cannot reach {host}")
    } else {
        "Price API error".to_string()
    }
}
