//! Error handling.
//!
//! Errors are grouped by concern:
//! - **Initialization**: logger, HTTP client and database setup (fatal at startup)
//! - **Database**: persistent store failures (logged, degrade to cache miss)
//! - **Provider**: node RPC failures (logged, treated as an empty result)
//! - **Geo API**: external lookup failures (signalled to connectivity tracking)
//! - **Import**: bulk dataset failures (import rejected wholesale)

mod types;

// Re-export public API
pub use types::{DatabaseError, GeoApiError, ImportError, InitializationError, ProviderError};
