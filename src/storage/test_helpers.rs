//! Shared test helpers for storage module tests.
//!
//! This module provides common utilities for database setup and test data creation
//! used across storage and geo tests.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::geo::GeoRecord;
use crate::storage::run_migrations;

/// Creates a test database pool with migrations applied.
///
/// Uses a single-connection in-memory database so every query sees the same
/// schema.
pub async fn create_test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Creates a fully populated record for `ip`.
pub fn sample_record(ip: &str, country: &str, last_updated: i64) -> GeoRecord {
    GeoRecord {
        ip: ip.to_string(),
        continent: Some("Europe".to_string()),
        continent_code: Some("EU".to_string()),
        country: Some(country.to_string()),
        country_code: Some("XX".to_string()),
        region: Some("HE".to_string()),
        region_name: Some("Hesse".to_string()),
        city: Some("Frankfurt".to_string()),
        district: None,
        zip: Some("60311".to_string()),
        lat: Some(50.11),
        lon: Some(8.68),
        timezone: Some("Europe/Berlin".to_string()),
        utc_offset: Some(3600),
        currency: Some("EUR".to_string()),
        isp: Some("Example ISP".to_string()),
        org: Some("Example Org".to_string()),
        as_info: Some("AS64500 Example".to_string()),
        asname: Some("EXAMPLE".to_string()),
        mobile: false,
        proxy: false,
        hosting: true,
        last_updated,
    }
}
