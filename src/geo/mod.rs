//! Peer IP geolocation.
//!
//! This module provides:
//! - the session cache consumers read (`ok`, `private`, `unavailable`,
//!   pending when absent)
//! - single-flight de-duplication of queued lookups
//! - payload validation guarding the persistent store
//! - the ip-api.com client
//! - the resolution worker tying the tiers together

mod api;
mod cache;
mod pipeline;
mod types;
mod validate;

pub use api::{GeoApiClient, IpApiClient};
pub use cache::{PendingLookupSet, SessionCache};
pub use pipeline::{GeoRequest, GeoResolutionPipeline, GeoSettings};
pub use types::{GeoEntry, GeoPayload, GeoRecord, GeoStatus, LookupOutcome};
pub use validate::is_valid_geo_data;
