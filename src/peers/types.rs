//! Peer data model.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use tokio::time::Instant;

use super::address::{extract_ip, extract_port, network_type};

/// One entry of the node's `getpeerinfo` answer. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: i64,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub inbound: bool,
    #[serde(default)]
    pub bytessent: u64,
    #[serde(default)]
    pub bytesrecv: u64,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub subver: String,
    #[serde(default)]
    pub connection_type: Option<String>,
    /// Unix seconds when the connection was opened
    #[serde(default)]
    pub conntime: i64,
    #[serde(default)]
    pub pingtime: Option<f64>,
    #[serde(default)]
    pub servicesnames: Vec<String>,
}

impl PeerRecord {
    pub fn ip(&self) -> &str {
        extract_ip(&self.addr)
    }

    pub fn port(&self) -> &str {
        extract_port(&self.addr)
    }

    /// The node's own network label, or a guess from the address.
    pub fn network_type(&self) -> &str {
        match self.network.as_deref() {
            Some(network) if !network.is_empty() => network,
            _ => network_type(&self.addr),
        }
    }

    pub fn address(&self) -> PeerAddress {
        PeerAddress {
            ip: self.ip().to_string(),
            port: self.port().to_string(),
            network: self.network_type().to_string(),
        }
    }
}

/// Where a peer was, remembered so disconnects can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerAddress {
    pub ip: String,
    pub port: String,
    pub network: String,
}

impl PeerAddress {
    /// Placeholder for a peer whose address was never seen.
    pub fn unknown(id: i64) -> Self {
        PeerAddress {
            ip: format!("peer#{id}"),
            port: String::new(),
            network: "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Connected,
    Disconnected,
}

/// A connect or disconnect seen between two ticks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Monotonic time used for pruning
    #[serde(skip)]
    pub at: Instant,
    /// Unix seconds, for display
    pub timestamp: i64,
    pub kind: ChangeKind,
    pub address: PeerAddress,
}
