//! Sanity checks applied before an API answer is persisted.

use super::types::GeoPayload;

/// Returns `true` when a payload is fit for the persistent store.
///
/// Coordinates must be present and in range. The API uses (0, 0) as a
/// placeholder for "unknown", so that pair is only accepted alongside a
/// country, and a non-empty country is required in every case.
pub fn is_valid_geo_data(payload: &GeoPayload) -> bool {
    let (Some(lat), Some(lon)) = (payload.lat, payload.lon) else {
        return false;
    };
    if !lat.is_finite() || !lon.is_finite() {
        return false;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return false;
    }
    let has_country = payload
        .country
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());
    if lat == 0.0 && lon == 0.0 && !has_country {
        return false;
    }
    has_country
}
