//! Persistent geolocation store backed by SQLite.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::time::Instant;

use crate::config::{STORE_COOLDOWN, STORE_FAILURE_THRESHOLD};
use crate::error_handling::DatabaseError;
use crate::geo::GeoRecord;

/// Row count and timestamp range of the persistent store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub count: i64,
    /// Oldest non-zero `last_updated`, unix seconds
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

/// Durable IP → location cache consulted before any external lookup.
#[async_trait]
pub trait GeoStore: Send + Sync {
    async fn get(&self, ip: &str) -> Result<Option<GeoRecord>, DatabaseError>;

    /// Inserts or replaces the row for `record.ip`.
    async fn upsert(&self, record: &GeoRecord) -> Result<(), DatabaseError>;

    /// Inserts rows whose IP is absent, leaving existing rows untouched.
    ///
    /// Runs in a single transaction. Returns the number of rows inserted.
    async fn bulk_merge_ignoring_conflicts(
        &self,
        records: &[GeoRecord],
    ) -> Result<u64, DatabaseError>;

    async fn stats(&self) -> Result<StoreStats, DatabaseError>;

    /// Runs SQLite's integrity check; `true` when the file is healthy.
    async fn integrity_check(&self) -> Result<bool, DatabaseError>;
}

const COLUMNS: &str = "ip, continent, continentCode, country, countryCode, region, regionName, \
    city, district, zip, lat, lon, timezone, utc_offset, currency, isp, org, as_info, asname, \
    mobile, proxy, hosting, last_updated";

const PLACEHOLDERS: &str = "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

/// Selects every row of a geo_cache table.
pub(crate) fn select_all_sql() -> String {
    format!("SELECT {COLUMNS} FROM geo_cache")
}

/// Maps a `geo_cache` row to a record.
///
/// Flags are stored as integers; any non-zero value is true.
pub(crate) fn record_from_row(row: &SqliteRow) -> Result<GeoRecord, sqlx::Error> {
    let flag = |name: &str| -> Result<bool, sqlx::Error> {
        Ok(row.try_get::<Option<i64>, _>(name)?.unwrap_or(0) != 0)
    };
    Ok(GeoRecord {
        ip: row.try_get("ip")?,
        continent: row.try_get("continent")?,
        continent_code: row.try_get("continentCode")?,
        country: row.try_get("country")?,
        country_code: row.try_get("countryCode")?,
        region: row.try_get("region")?,
        region_name: row.try_get("regionName")?,
        city: row.try_get("city")?,
        district: row.try_get("district")?,
        zip: row.try_get("zip")?,
        lat: row.try_get("lat")?,
        lon: row.try_get("lon")?,
        timezone: row.try_get("timezone")?,
        utc_offset: row.try_get("utc_offset")?,
        currency: row.try_get("currency")?,
        isp: row.try_get("isp")?,
        org: row.try_get("org")?,
        as_info: row.try_get("as_info")?,
        asname: row.try_get("asname")?,
        mobile: flag("mobile")?,
        proxy: flag("proxy")?,
        hosting: flag("hosting")?,
        last_updated: row.try_get::<Option<i64>, _>("last_updated")?.unwrap_or(0),
    })
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    r: &'q GeoRecord,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&r.ip)
        .bind(&r.continent)
        .bind(&r.continent_code)
        .bind(&r.country)
        .bind(&r.country_code)
        .bind(&r.region)
        .bind(&r.region_name)
        .bind(&r.city)
        .bind(&r.district)
        .bind(&r.zip)
        .bind(r.lat)
        .bind(r.lon)
        .bind(&r.timezone)
        .bind(r.utc_offset)
        .bind(&r.currency)
        .bind(&r.isp)
        .bind(&r.org)
        .bind(&r.as_info)
        .bind(&r.asname)
        .bind(r.mobile as i64)
        .bind(r.proxy as i64)
        .bind(r.hosting as i64)
        .bind(r.last_updated)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Failure streak for one kind of store access.
///
/// `limit` consecutive failures disable that access until `cooldown` has
/// passed; the next call after that runs against the database again.
#[derive(Debug, Default)]
struct AccessHealth {
    failures: u32,
    disabled_until: Option<Instant>,
}

impl AccessHealth {
    /// Whether calls may go to the database at `now`. Re-enables the access
    /// once its cooldown has passed.
    fn is_enabled(&mut self, now: Instant) -> bool {
        match self.disabled_until {
            Some(until) if now < until => false,
            Some(_) => {
                self.disabled_until = None;
                self.failures = 0;
                true
            }
            None => true,
        }
    }

    fn succeeded(&mut self) {
        self.failures = 0;
    }

    /// Returns `true` when this failure switched the access off.
    fn failed(&mut self, now: Instant, limit: u32, cooldown: Duration) -> bool {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= limit && self.disabled_until.is_none() {
            self.disabled_until = Some(now + cooldown);
            return true;
        }
        false
    }
}

/// SQLite implementation of [`GeoStore`].
///
/// Reads and writes keep separate failure streaks. A failing side is
/// disabled for a cooldown and its calls return [`DatabaseError::StoreDisabled`],
/// which the pipeline treats as a cache miss.
pub struct SqliteGeoStore {
    pool: SqlitePool,
    reads: Mutex<AccessHealth>,
    writes: Mutex<AccessHealth>,
    failure_limit: u32,
    cooldown: Duration,
}

impl SqliteGeoStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_failure_limit(pool, STORE_FAILURE_THRESHOLD, STORE_COOLDOWN)
    }

    pub fn with_failure_limit(pool: SqlitePool, failure_limit: u32, cooldown: Duration) -> Self {
        SqliteGeoStore {
            pool,
            reads: Mutex::new(AccessHealth::default()),
            writes: Mutex::new(AccessHealth::default()),
            failure_limit: failure_limit.max(1),
            cooldown,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `false` while reads are disabled after repeated failures.
    pub fn reads_enabled(&self) -> bool {
        self.health(Access::Read).is_enabled(Instant::now())
    }

    /// `false` while writes are disabled after repeated failures.
    pub fn writes_enabled(&self) -> bool {
        self.health(Access::Write).is_enabled(Instant::now())
    }

    fn health(&self, access: Access) -> std::sync::MutexGuard<'_, AccessHealth> {
        let slot = match access {
            Access::Read => &self.reads,
            Access::Write => &self.writes,
        };
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self, access: Access) -> Result<(), DatabaseError> {
        let mut health = self.health(access);
        let was_disabled = health.disabled_until.is_some();
        if !health.is_enabled(Instant::now()) {
            return Err(DatabaseError::StoreDisabled);
        }
        if was_disabled {
            info!("Geo store {access:?} access re-enabled after cooldown");
        }
        Ok(())
    }

    fn track<T>(
        &self,
        access: Access,
        result: Result<T, sqlx::Error>,
    ) -> Result<T, DatabaseError> {
        let mut health = self.health(access);
        match result {
            Ok(value) => {
                health.succeeded();
                Ok(value)
            }
            Err(e) => {
                if health.failed(Instant::now(), self.failure_limit, self.cooldown) {
                    warn!(
                        "Geo store {access:?} access disabled for {:?} after {} consecutive failures",
                        self.cooldown, health.failures
                    );
                }
                Err(DatabaseError::SqlError(e))
            }
        }
    }
}

#[async_trait]
impl GeoStore for SqliteGeoStore {
    async fn get(&self, ip: &str) -> Result<Option<GeoRecord>, DatabaseError> {
        self.guard(Access::Read)?;
        let sql = format!("{} WHERE ip = ?", select_all_sql());
        let result = sqlx::query(&sql)
            .bind(ip)
            .fetch_optional(&self.pool)
            .await
            .and_then(|row| row.as_ref().map(record_from_row).transpose());
        self.track(Access::Read, result)
    }

    async fn upsert(&self, record: &GeoRecord) -> Result<(), DatabaseError> {
        self.guard(Access::Write)?;
        let sql = format!(
            "INSERT INTO geo_cache ({COLUMNS}) VALUES ({PLACEHOLDERS})
            ON CONFLICT(ip) DO UPDATE SET
                continent=excluded.continent,
                continentCode=excluded.continentCode,
                country=excluded.country,
                countryCode=excluded.countryCode,
                region=excluded.region,
                regionName=excluded.regionName,
                city=excluded.city,
                district=excluded.district,
                zip=excluded.zip,
                lat=excluded.lat,
                lon=excluded.lon,
                timezone=excluded.timezone,
                utc_offset=excluded.utc_offset,
                currency=excluded.currency,
                isp=excluded.isp,
                org=excluded.org,
                as_info=excluded.as_info,
                asname=excluded.asname,
                mobile=excluded.mobile,
                proxy=excluded.proxy,
                hosting=excluded.hosting,
                last_updated=excluded.last_updated"
        );
        let result = bind_record(sqlx::query(&sql), record)
            .execute(&self.pool)
            .await
            .map(|_| ());
        self.track(Access::Write, result)
    }

    async fn bulk_merge_ignoring_conflicts(
        &self,
        records: &[GeoRecord],
    ) -> Result<u64, DatabaseError> {
        self.guard(Access::Write)?;
        let sql = format!("INSERT OR IGNORE INTO geo_cache ({COLUMNS}) VALUES ({PLACEHOLDERS})");
        let result = async {
            let mut tx = self.pool.begin().await?;
            let mut inserted = 0u64;
            for record in records {
                inserted += bind_record(sqlx::query(&sql), record)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok::<u64, sqlx::Error>(inserted)
        }
        .await;
        self.track(Access::Write, result)
    }

    async fn stats(&self) -> Result<StoreStats, DatabaseError> {
        self.guard(Access::Read)?;
        let result = sqlx::query(
            "SELECT COUNT(*),
                MIN(CASE WHEN last_updated > 0 THEN last_updated END),
                MAX(last_updated)
            FROM geo_cache",
        )
        .fetch_one(&self.pool)
        .await
        .and_then(|row| {
            Ok(StoreStats {
                count: row.try_get(0)?,
                oldest: row.try_get(1)?,
                newest: row.try_get(2)?,
            })
        });
        self.track(Access::Read, result)
    }

    async fn integrity_check(&self) -> Result<bool, DatabaseError> {
        let result = sqlx::query("PRAGMA integrity_check")
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get::<String, _>(0));
        let verdict = self.track(Access::Read, result)?;
        Ok(verdict.eq_ignore_ascii_case("ok"))
    }
}
