//! Application initialization and resource setup.
//!
//! This module provides functions to initialize shared resources:
//! - Logger
//! - HTTP clients (per-dependency timeouts)

mod client;
mod logger;

// Re-export public API
pub use client::{init_client, init_probe_client, USER_AGENT};
pub use logger::init_logger_with;
