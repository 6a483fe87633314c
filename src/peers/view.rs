//! Display-ready peer rows.

use serde::Serialize;

use super::address::is_private_ip;
use super::types::PeerRecord;
use crate::geo::{GeoEntry, GeoRecord, GeoStatus};

/// Short label for a `connection_type`.
pub fn abbrev_connection_type(conn_type: &str) -> String {
    match conn_type {
        "outbound-full-relay" => "OFR".to_string(),
        "block-relay-only" => "BLO".to_string(),
        "inbound" => "INB".to_string(),
        "manual" => "MAN".to_string(),
        "addr-fetch" => "FET".to_string(),
        "feeler" => "FEL".to_string(),
        "" => "-".to_string(),
        other => other.chars().take(3).collect::<String>().to_uppercase(),
    }
}

/// Human-readable byte count (`512B`, `1.5KB`, `3.2MB`, `1.25GB`).
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match bytes {
        b if b < KB => format!("{b}B"),
        b if b < MB => format!("{:.1}KB", b as f64 / KB as f64),
        b if b < GB => format!("{:.1}MB", b as f64 / MB as f64),
        b => format!("{:.2}GB", b as f64 / GB as f64),
    }
}

/// Connection age as its two most significant non-zero units (`3d4h`, `5m`).
/// `-` when the connection time is unknown.
pub fn format_conn_time(conntime: i64, now: i64) -> String {
    if conntime <= 0 {
        return "-".to_string();
    }
    let elapsed = (now - conntime).max(0);
    let units = [
        (elapsed / 86_400, 'd'),
        ((elapsed % 86_400) / 3_600, 'h'),
        ((elapsed % 3_600) / 60, 'm'),
        (elapsed % 60, 's'),
    ];
    let Some(first) = units.iter().position(|(value, _)| *value > 0) else {
        return "0s".to_string();
    };
    let mut out = format!("{}{}", units[first].0, units[first].1);
    if let Some((value, unit)) = units[first + 1..].iter().find(|(value, _)| *value > 0) {
        out.push_str(&format!("{value}{unit}"));
    }
    out
}

/// One peer joined with its session geo entry and addrman membership.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerView {
    pub id: i64,
    pub addr: String,
    pub network: String,
    pub ip: String,
    pub port: String,
    pub direction: &'static str,
    pub subver: String,
    pub version: i64,
    pub bytessent: u64,
    pub bytesrecv: u64,
    pub bytessent_fmt: String,
    pub bytesrecv_fmt: String,
    pub ping_ms: u64,
    pub conntime: i64,
    pub conntime_fmt: String,
    pub connection_type: String,
    pub connection_type_abbrev: String,
    pub services: Vec<String>,
    pub services_abbrev: String,
    pub in_addrman: bool,
    pub location_status: GeoStatus,
    pub location: String,
    pub geo: Option<GeoRecord>,
}

impl PeerView {
    pub fn build(peer: &PeerRecord, geo: GeoEntry, in_addrman: bool, now: i64) -> Self {
        let network = peer.network_type().to_string();
        let ip = peer.ip().to_string();
        let overlay = matches!(network.as_str(), "onion" | "i2p" | "cjdns");

        let (location_status, location) = if overlay || is_private_ip(&ip) {
            (GeoStatus::Private, "PRIVATE".to_string())
        } else {
            match geo.status {
                GeoStatus::Ok => (
                    GeoStatus::Ok,
                    geo.record.as_ref().map(location_label).unwrap_or_default(),
                ),
                GeoStatus::Unavailable => (GeoStatus::Unavailable, "UNAVAILABLE".to_string()),
                // A private mark on a clearnet address is stale: keep looking
                GeoStatus::Private | GeoStatus::Pending => {
                    (GeoStatus::Pending, "Stalking...".to_string())
                }
            }
        };

        let connection_type = peer.connection_type.clone().unwrap_or_default();
        let services_abbrev = peer
            .servicesnames
            .iter()
            .take(5)
            .map(|s| s.chars().next().map(String::from).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ");

        PeerView {
            id: peer.id,
            addr: peer.addr.clone(),
            port: peer.port().to_string(),
            direction: if peer.inbound { "IN" } else { "OUT" },
            subver: peer.subver.replace('/', ""),
            version: peer.version,
            bytessent: peer.bytessent,
            bytesrecv: peer.bytesrecv,
            bytessent_fmt: format_bytes(peer.bytessent),
            bytesrecv_fmt: format_bytes(peer.bytesrecv),
            ping_ms: (peer.pingtime.unwrap_or(0.0).max(0.0) * 1000.0) as u64,
            conntime: peer.conntime,
            conntime_fmt: format_conn_time(peer.conntime, now),
            connection_type_abbrev: abbrev_connection_type(&connection_type),
            connection_type,
            services: peer.servicesnames.clone(),
            services_abbrev,
            in_addrman,
            location_status,
            location,
            geo: geo.record,
            network,
            ip,
        }
    }
}

/// `City, CC`, or whatever part of it is known.
fn location_label(record: &GeoRecord) -> String {
    let city = record.city.as_deref().filter(|c| !c.is_empty());
    let code = record.country_code.as_deref().filter(|c| !c.is_empty());
    match (city, code) {
        (Some(city), Some(code)) => format!("{city}, {code}"),
        (Some(city), None) => city.to_string(),
        (None, _) => record.country.clone().unwrap_or_default(),
    }
}
