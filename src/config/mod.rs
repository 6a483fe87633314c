//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (intervals, timeouts, thresholds)
//! - CLI option types and parsing

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::{ChainNetwork, Config, LogFormat, LogLevel};
