//! Error type definitions.
//!
//! This module defines the error types used throughout the application. Background
//! workers never propagate these past their own loop; they log and degrade.

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),

    /// Error opening the persistent geolocation database.
    #[error("Database initialization error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

/// Error types for database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error creating the database file or its directory.
    #[error("Database file creation error: {0}")]
    FileCreationError(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    /// Schema migration error.
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    /// `PRAGMA integrity_check` reported a problem.
    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    /// Store access is disabled for a cooldown after repeated failures.
    #[error("Geo store temporarily disabled after repeated failures")]
    StoreDisabled,
}

/// Errors from the node-facing providers (peer info, address list).
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The bitcoin-cli process could not be spawned.
    #[error("Failed to run {command}: {source}")]
    Spawn {
        /// Command that was run
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The bitcoin-cli process did not finish in time.
    #[error("{0} timed out")]
    Timeout(String),

    /// The bitcoin-cli process exited with a non-zero status.
    #[error("{command} exited with status {status}: {stderr}")]
    NonZeroExit {
        /// Command that was run
        command: String,
        /// Exit status code (-1 when killed by a signal)
        status: i32,
        /// Trimmed stderr output
        stderr: String,
    },

    /// The process output was not the expected JSON.
    #[error("Failed to parse {command} output: {source}")]
    Parse {
        /// Command that was run
        command: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the external geolocation API.
///
/// Every variant counts as a network failure for connectivity tracking. A
/// well-formed response whose `status` is not `success` is *not* an error; it is
/// reported as [`crate::geo::LookupOutcome::NotFound`].
#[derive(Error, Debug)]
pub enum GeoApiError {
    /// Connection, timeout or other transport failure.
    #[error("Geo API transport error: {0}")]
    Transport(#[from] ReqwestError),

    /// The API answered with a non-200 HTTP status.
    #[error("Geo API returned HTTP {0}")]
    HttpStatus(u16),
}

/// Errors from the bulk geolocation dataset import.
///
/// Any of these rejects the import wholesale; the live store is untouched.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The download failed at the transport level.
    #[error("Download failed: {0}")]
    Download(#[from] ReqwestError),

    /// The download answered with a non-200 HTTP status.
    #[error("Download failed (HTTP {0})")]
    HttpStatus(u16),

    /// Writing the downloaded file failed.
    #[error("Failed to write dataset file: {0}")]
    Io(#[from] std::io::Error),

    /// The dataset failed `PRAGMA integrity_check`.
    #[error("Dataset integrity check failed: {0}")]
    Integrity(String),

    /// The file is not a SQLite database with a `geo_cache` table.
    #[error("Downloaded file is not a valid geo database: {0}")]
    NotAGeoDatabase(String),

    /// The dataset holds no rows.
    #[error("Dataset is empty")]
    Empty,

    /// Merging into the live store failed (transaction rolled back).
    #[error("Merge failed: {0}")]
    Database(#[from] DatabaseError),
}
