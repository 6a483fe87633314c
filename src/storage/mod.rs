// storage/mod.rs
// Persistent geo cache: pool, migrations, store, bulk import

mod geo_store;
pub mod import;
pub mod migrations;
pub mod pool;
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used items
pub use geo_store::{GeoStore, SqliteGeoStore, StoreStats};
pub use import::{
    cleanup_temp_files, download_dataset, import_dataset, update_geo_database, ImportSummary,
};
pub use migrations::run_migrations;
pub use pool::{init_db_pool_with_path, open_existing};
