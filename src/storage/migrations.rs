// storage/migrations.rs
// Database migration management

use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};

/// Schema migrations, embedded in the binary from `migrations/`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Brings the geo_cache schema up to date.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), anyhow::Error> {
    MIGRATOR.run(pool).await?;
    Ok(())
}
