//! Geolocation API client (ip-api.com JSON endpoint).

use async_trait::async_trait;

use super::types::{GeoPayload, LookupOutcome};
use crate::config::GEO_API_FIELDS;
use crate::error_handling::GeoApiError;

/// Resolves one IP against an external geolocation service.
///
/// Rate limiting is the caller's job.
#[async_trait]
pub trait GeoApiClient: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<LookupOutcome, GeoApiError>;
}

/// Client for `{base_url}/{ip}?fields=...`.
pub struct IpApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl IpApiClient {
    /// `client` should carry the geo API timeout.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        IpApiClient {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl GeoApiClient for IpApiClient {
    async fn lookup(&self, ip: &str) -> Result<LookupOutcome, GeoApiError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), ip);
        let resp = self
            .client
            .get(&url)
            .query(&[("fields", GEO_API_FIELDS)])
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(GeoApiError::HttpStatus(status.as_u16()));
        }

        let payload: GeoPayload = resp.json().await?;
        if payload.is_success() {
            Ok(LookupOutcome::Found(payload))
        } else {
            log::debug!(
                "Geo API has no data for {ip}: {}",
                payload.message.as_deref().unwrap_or("no message")
            );
            Ok(LookupOutcome::NotFound)
        }
    }
}
