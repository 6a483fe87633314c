//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `peer_map` library that handles:
//! - Command-line argument parsing
//! - Environment variable loading (.env file)
//! - Logger initialization
//! - Logging a one-line summary whenever the monitored state changes
//!
//! All core functionality is implemented in the library crate.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use peer_map::config::KEEPALIVE_TIMEOUT;
use peer_map::initialization::init_logger_with;
use peer_map::{Config, Monitor, Notification};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    // Try the current directory first, then the executable's directory
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    let config = Config::parse();

    let log_level = config.log_level.clone();
    let log_format = config.log_format.clone();
    init_logger_with(log_level.into(), log_format).context("Failed to initialize logger")?;

    let monitor = Monitor::start(config)
        .await
        .context("Failed to start monitor")?;
    let mut updates = monitor.subscribe();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            notification = updates.wait_for_update(KEEPALIVE_TIMEOUT) => match notification {
                Notification::Closed => break,
                Notification::Keepalive => {}
                Notification::Update(kind) => {
                    let peers = monitor.peers();
                    let located = peers
                        .iter()
                        .filter(|p| p.location_status == peer_map::geo::GeoStatus::Ok)
                        .count();
                    info!(
                        "[{kind}] {} peers ({located} located, {} pending lookups), internet {}, lookups {}",
                        peers.len(),
                        monitor.geo().pending_count(),
                        monitor.connectivity_state(),
                        if monitor.store_only() { "database only" } else { "database + API" }
                    );
                }
            },
        }
    }

    monitor.shutdown().await;
    Ok(())
}
