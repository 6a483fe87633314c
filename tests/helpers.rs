// Shared test helpers for database setup and test data creation.
//
// This module provides common utilities used across multiple test files to reduce duplication.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use peer_map::connectivity::{
    ConnectivityMonitor, ConnectivitySettings, ConnectivityState, ReachabilityProbe,
};
use peer_map::geo::GeoRecord;
use peer_map::storage::{init_db_pool_with_path, run_migrations, SqliteGeoStore};
use peer_map::UpdateBroadcaster;

/// Opens (creating if needed) a file-backed store with migrations applied.
#[allow(dead_code)] // Used by other test files
pub async fn create_test_store(db_path: &Path) -> SqliteGeoStore {
    let pool = init_db_pool_with_path(db_path)
        .await
        .expect("Failed to open test database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    SqliteGeoStore::new(pool)
}

/// A record with the fields the validator requires plus a city.
#[allow(dead_code)]
pub fn located(ip: &str, city: &str, country: &str, last_updated: i64) -> GeoRecord {
    GeoRecord {
        ip: ip.to_string(),
        city: Some(city.to_string()),
        country: Some(country.to_string()),
        country_code: Some(country.chars().take(2).collect::<String>().to_uppercase()),
        lat: Some(10.0),
        lon: Some(20.0),
        last_updated,
        ..Default::default()
    }
}

/// Probe with a fixed answer.
#[allow(dead_code)]
pub struct FixedProbe(pub bool);

#[async_trait]
impl ReachabilityProbe for FixedProbe {
    async fn check(&self) -> bool {
        self.0
    }
}

/// Broadcaster plus connectivity monitor sharing one cancellation token.
#[allow(dead_code)]
pub fn connectivity(
    initial: ConnectivityState,
    probe_ok: bool,
) -> (Arc<UpdateBroadcaster>, Arc<ConnectivityMonitor>, CancellationToken) {
    let cancel = CancellationToken::new();
    let broadcaster = Arc::new(UpdateBroadcaster::new(cancel.clone()));
    let monitor = ConnectivityMonitor::new(
        initial,
        Arc::new(FixedProbe(probe_ok)),
        Arc::clone(&broadcaster),
        ConnectivitySettings::default(),
        cancel.clone(),
    );
    (broadcaster, monitor, cancel)
}
