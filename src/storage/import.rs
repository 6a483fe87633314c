//! Bulk geo dataset import.
//!
//! A prebuilt geo database is downloaded to a temp file, checked, and merged
//! into the live store with insert-if-absent semantics: rows the geo worker
//! already resolved are never overwritten, the dataset only fills gaps.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use sqlx::{Row, SqlitePool};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use super::geo_store::{record_from_row, select_all_sql, GeoStore};
use super::pool::open_existing;
use crate::config::{
    DATASET_DOWNLOAD_TIMEOUT, RETRY_FACTOR, RETRY_INITIAL_DELAY_MS, RETRY_MAX_ATTEMPTS,
    RETRY_MAX_DELAY_SECS,
};
use crate::error_handling::ImportError;
use crate::geo::GeoRecord;

/// File name of the downloaded dataset inside the temp directory.
pub const DATASET_TMP_FILE: &str = "geo_download.db";

/// Outcome of a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// Rows read from the dataset
    pub imported_rows: u64,
    /// Rows that were absent from the live store and got inserted
    pub new_rows: u64,
    /// Live store row count after the merge
    pub total_rows: i64,
}

/// Creates the exponential backoff strategy used for dataset downloads.
///
/// - Initial delay: `RETRY_INITIAL_DELAY_MS` milliseconds
/// - Backoff factor: `RETRY_FACTOR`
/// - Maximum delay: `RETRY_MAX_DELAY_SECS` seconds
/// - Maximum retries: `RETRY_MAX_ATTEMPTS`
pub fn get_retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(RETRY_INITIAL_DELAY_MS)
        .factor(RETRY_FACTOR)
        .max_delay(Duration::from_secs(RETRY_MAX_DELAY_SECS))
        .take(RETRY_MAX_ATTEMPTS)
}

/// Transient failures worth another download attempt.
fn is_retriable(error: &ImportError) -> bool {
    match error {
        ImportError::Download(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        ImportError::HttpStatus(status) => *status == 429 || (500..600).contains(status),
        _ => false,
    }
}

/// Downloads the dataset at `url` into `tmp_dir` and returns the file path.
///
/// # Errors
///
/// Returns `ImportError::HttpStatus` for non-success responses and
/// `ImportError::Download` for transport failures, after retries.
pub async fn download_dataset(
    client: &reqwest::Client,
    url: &str,
    tmp_dir: &Path,
) -> Result<PathBuf, ImportError> {
    tokio::fs::create_dir_all(tmp_dir).await?;
    let dest = tmp_dir.join(DATASET_TMP_FILE);

    info!("Downloading geo dataset from {url}");
    let bytes = RetryIf::spawn(
        get_retry_strategy(),
        || async {
            let resp = client
                .get(url)
                .timeout(DATASET_DOWNLOAD_TIMEOUT)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(ImportError::HttpStatus(resp.status().as_u16()));
            }
            Ok(resp.bytes().await?)
        },
        |e: &ImportError| {
            let retry = is_retriable(e);
            if retry {
                warn!("Geo dataset download failed, retrying: {e}");
            }
            retry
        },
    )
    .await?;

    tokio::fs::write(&dest, &bytes).await?;
    debug!("Geo dataset written to {} ({} bytes)", dest.display(), bytes.len());
    Ok(dest)
}

/// Reads and checks every row of a downloaded dataset.
async fn read_dataset(source: &SqlitePool) -> Result<Vec<GeoRecord>, ImportError> {
    let verdict: String = sqlx::query("PRAGMA integrity_check")
        .fetch_one(source)
        .await
        .and_then(|row| row.try_get(0))
        .map_err(|e| ImportError::Integrity(e.to_string()))?;
    if !verdict.eq_ignore_ascii_case("ok") {
        return Err(ImportError::Integrity(verdict));
    }

    let rows = sqlx::query(&select_all_sql())
        .fetch_all(source)
        .await
        .map_err(|e| ImportError::NotAGeoDatabase(e.to_string()))?;
    let records = rows
        .iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ImportError::NotAGeoDatabase(e.to_string()))?;

    if records.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(records)
}

/// Merges the dataset file at `path` into `store`.
///
/// The dataset is rejected wholesale, before the live store is touched, if it
/// fails SQLite's integrity check, has no readable `geo_cache` table, or is
/// empty.
pub async fn import_dataset(
    store: &dyn GeoStore,
    path: &Path,
) -> Result<ImportSummary, ImportError> {
    let source = open_existing(path)
        .await
        .map_err(|e| ImportError::Integrity(e.to_string()))?;
    let records = read_dataset(&source).await;
    source.close().await;
    let records = records?;

    let new_rows = store.bulk_merge_ignoring_conflicts(&records).await?;
    let total_rows = store.stats().await?.count;
    info!(
        "Geo database import: +{new_rows} new entries ({} in dataset, {total_rows} total)",
        records.len()
    );

    Ok(ImportSummary {
        imported_rows: records.len() as u64,
        new_rows,
        total_rows,
    })
}

/// Downloads and imports a dataset, removing the temp file afterwards.
pub async fn update_geo_database(
    client: &reqwest::Client,
    url: &str,
    tmp_dir: &Path,
    store: &dyn GeoStore,
) -> Result<ImportSummary, ImportError> {
    let path = download_dataset(client, url, tmp_dir).await?;
    let result = import_dataset(store, &path).await;
    cleanup_temp_files(tmp_dir);
    result
}

/// Removes dataset leftovers (including SQLite sidecar files) from `tmp_dir`.
pub fn cleanup_temp_files(tmp_dir: &Path) {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let path = tmp_dir.join(format!("{DATASET_TMP_FILE}{suffix}"));
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed leftover {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_helpers::{create_test_pool, sample_record};
    use crate::storage::{init_db_pool_with_path, run_migrations, SqliteGeoStore};
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn write_dataset(path: &Path, records: &[GeoRecord]) {
        let pool = init_db_pool_with_path(path).await.expect("dataset pool");
        run_migrations(&pool).await.expect("dataset migrations");
        SqliteGeoStore::new(pool.clone())
            .bulk_merge_ignoring_conflicts(records)
            .await
            .expect("dataset rows");
        pool.close().await;
    }

    #[tokio::test]
    async fn test_import_fills_gaps_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("dataset.db");
        write_dataset(
            &dataset,
            &[
                sample_record("1.1.1.1", "Old", 1),
                sample_record("2.2.2.2", "New", 1),
                sample_record("3.3.3.3", "New", 1),
            ],
        )
        .await;

        let store = SqliteGeoStore::new(create_test_pool().await);
        let live = sample_record("1.1.1.1", "Live", 99);
        store.upsert(&live).await.expect("upsert");

        let summary = import_dataset(&store, &dataset).await.expect("import");
        assert_eq!(
            summary,
            ImportSummary {
                imported_rows: 3,
                new_rows: 2,
                total_rows: 3
            }
        );
        assert_eq!(store.get("1.1.1.1").await.expect("get"), Some(live));

        // Second import adds nothing
        let again = import_dataset(&store, &dataset).await.expect("import");
        assert_eq!(again.new_rows, 0);
        assert_eq!(again.total_rows, 3);
    }

    #[tokio::test]
    async fn test_empty_dataset_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("empty.db");
        write_dataset(&dataset, &[]).await;

        let store = SqliteGeoStore::new(create_test_pool().await);
        assert!(matches!(
            import_dataset(&store, &dataset).await,
            Err(ImportError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_foreign_database_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("other.db");
        let pool = init_db_pool_with_path(&dataset).await.expect("pool");
        sqlx::query("CREATE TABLE something_else (id INTEGER)")
            .execute(&pool)
            .await
            .expect("create");
        pool.close().await;

        let store = SqliteGeoStore::new(create_test_pool().await);
        assert!(matches!(
            import_dataset(&store, &dataset).await,
            Err(ImportError::NotAGeoDatabase(_))
        ));
        assert_eq!(store.stats().await.expect("stats").count, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("garbage.db");
        std::fs::write(&dataset, vec![0x42u8; 8192]).expect("write garbage");

        let store = SqliteGeoStore::new(create_test_pool().await);
        assert!(matches!(
            import_dataset(&store, &dataset).await,
            Err(ImportError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn test_download_and_import() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("published.db");
        write_dataset(&source, &[sample_record("4.4.4.4", "Served", 7)]).await;
        let body = std::fs::read(&source).expect("read dataset");

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/geo.db"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let tmp = dir.path().join("tmp");
        let client = reqwest::Client::new();
        let store = SqliteGeoStore::new(create_test_pool().await);
        let summary = update_geo_database(&client, &format!("{}/geo.db", server.uri()), &tmp, &store)
            .await
            .expect("update");
        assert_eq!(summary.new_rows, 1);
        assert!(!tmp.join(DATASET_TMP_FILE).exists());
    }

    #[tokio::test]
    async fn test_download_not_found_is_not_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = download_dataset(&reqwest::Client::new(), &server.uri(), dir.path()).await;
        assert!(matches!(result, Err(ImportError::HttpStatus(404))));
    }

    #[test]
    fn test_cleanup_removes_leftovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(DATASET_TMP_FILE), b"x").expect("write");
        std::fs::write(dir.path().join(format!("{DATASET_TMP_FILE}-wal")), b"x").expect("write");

        cleanup_temp_files(dir.path());
        assert!(!dir.path().join(DATASET_TMP_FILE).exists());
        assert!(!dir.path().join(format!("{DATASET_TMP_FILE}-wal")).exists());
    }
}
