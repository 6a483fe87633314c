//! Connected peers.
//!
//! This module provides:
//! - the `getpeerinfo` data model and address helpers
//! - providers talking to the node through bitcoin-cli
//! - the addrman membership cache
//! - the tick loop that diffs peer snapshots into connect/disconnect events
//! - display helpers for peer rows

mod address;
mod addrman;
mod provider;
mod tracker;
mod types;
mod view;

pub use address::{extract_ip, extract_port, is_private_ip, is_public_address, network_type};
pub use addrman::AddrManCache;
pub use provider::{AddressListProvider, BitcoinCli, PeerInfoProvider};
pub use tracker::{PeerChangeTracker, TickReport, TickState, TrackerSettings};
pub use types::{ChangeEvent, ChangeKind, PeerAddress, PeerRecord};
pub use view::{abbrev_connection_type, format_bytes, format_conn_time, PeerView};
