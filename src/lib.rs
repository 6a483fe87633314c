//! peer_map library: Bitcoin node peer monitoring
//!
//! This library watches the peers of a Bitcoin node and keeps the state a
//! dashboard needs: the current peer list with connect/disconnect events,
//! peer geolocation (session cache, persistent SQLite store, external API),
//! internet reachability, smoothed host metrics and the BTC spot price.
//! Consumers subscribe to coalesced update notifications and re-read state
//! when woken.
//!
//! # Example
//!
//! ```no_run
//! use peer_map::{Config, Monitor};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     datadir: Some("/srv/bitcoin".into()),
//!     ..Default::default()
//! };
//!
//! let monitor = Monitor::start(config).await?;
//! let mut updates = monitor.subscribe();
//! updates.wait_for_update(Duration::from_secs(2)).await;
//! for peer in monitor.peers() {
//!     println!("{} {} {}", peer.id, peer.ip, peer.location);
//! }
//! monitor.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your application
//! or ensure you're calling library functions within an async context.

pub mod broadcaster;
pub mod config;
pub mod connectivity;
pub mod error_handling;
pub mod geo;
pub mod initialization;
mod monitor;
pub mod peers;
pub mod price;
pub mod stats;
pub mod storage;

// Re-export public API
pub use broadcaster::{Notification, NotificationSink, UpdateBroadcaster, UpdateKind};
pub use config::{ChainNetwork, Config, LogFormat, LogLevel};
pub use connectivity::ConnectivityState;
pub use monitor::{Collaborators, Monitor};
pub use peers::{ChangeEvent, ChangeKind, PeerView};
