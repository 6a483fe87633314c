//! Geolocation data types.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{AsRefStr, Display};

/// Raw response body of the geolocation API.
///
/// Every field is optional: the API omits fields it has no data for and
/// returns only `status`/`message` on failure. A coordinate that is not a
/// JSON number decodes as absent, which fails validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPayload {
    pub status: Option<String>,
    pub message: Option<String>,
    pub continent: Option<String>,
    pub continent_code: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub zip: Option<String>,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub offset: Option<i64>,
    pub currency: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "as")]
    pub as_info: Option<String>,
    pub asname: Option<String>,
    pub mobile: Option<bool>,
    pub proxy: Option<bool>,
    pub hosting: Option<bool>,
}

fn lenient_coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(serde_json::Value::as_f64))
}

impl GeoPayload {
    /// True when the API reported `"status": "success"`.
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// A resolved location for one IP, as stored in the persistent tier and
/// shown from the session cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoRecord {
    pub ip: String,
    pub continent: Option<String>,
    pub continent_code: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub zip: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub utc_offset: Option<i64>,
    pub currency: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    pub as_info: Option<String>,
    pub asname: Option<String>,
    pub mobile: bool,
    pub proxy: bool,
    pub hosting: bool,
    /// Unix seconds of the last successful resolution
    pub last_updated: i64,
}

impl GeoRecord {
    /// Builds a record from an API payload, stamped with the current time.
    pub fn from_payload(ip: &str, payload: GeoPayload) -> Self {
        GeoRecord {
            ip: ip.to_string(),
            continent: payload.continent,
            continent_code: payload.continent_code,
            country: payload.country,
            country_code: payload.country_code,
            region: payload.region,
            region_name: payload.region_name,
            city: payload.city,
            district: payload.district,
            zip: payload.zip,
            lat: payload.lat,
            lon: payload.lon,
            timezone: payload.timezone,
            utc_offset: payload.offset,
            currency: payload.currency,
            isp: payload.isp,
            org: payload.org,
            as_info: payload.as_info,
            asname: payload.asname,
            mobile: payload.mobile.unwrap_or(false),
            proxy: payload.proxy.unwrap_or(false),
            hosting: payload.hosting.unwrap_or(false),
            last_updated: Utc::now().timestamp(),
        }
    }
}

/// Lookup status of an IP as reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GeoStatus {
    Ok,
    Private,
    Unavailable,
    /// No session entry yet: queued, in flight, or deferred while offline
    Pending,
}

/// A session-cache entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoEntry {
    pub status: GeoStatus,
    pub record: Option<GeoRecord>,
}

impl GeoEntry {
    pub fn resolved(record: GeoRecord) -> Self {
        GeoEntry {
            status: GeoStatus::Ok,
            record: Some(record),
        }
    }

    pub fn private() -> Self {
        GeoEntry {
            status: GeoStatus::Private,
            record: None,
        }
    }

    pub fn unavailable() -> Self {
        GeoEntry {
            status: GeoStatus::Unavailable,
            record: None,
        }
    }

    pub fn pending() -> Self {
        GeoEntry {
            status: GeoStatus::Pending,
            record: None,
        }
    }
}

/// Result of one geolocation API call that reached the API.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// The API answered with `status: success`
    Found(GeoPayload),
    /// The API answered but had no data for this IP
    NotFound,
}
