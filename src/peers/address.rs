//! Peer address helpers.
//!
//! Node addresses come as `v4:port`, `[v6]:port`, bare v6, or overlay hosts
//! (`.onion`, `.i2p`). Nothing here resolves names.

/// Network class guessed from the address text.
///
/// Used only when the peer record carries no `network` field.
pub fn network_type(addr: &str) -> &'static str {
    if addr.contains(".onion") {
        "onion"
    } else if addr.contains(".i2p") {
        "i2p"
    } else if addr.starts_with("fc") || addr.starts_with("fd") {
        "cjdns"
    } else if addr.matches(':').count() > 1 {
        "ipv6"
    } else {
        "ipv4"
    }
}

/// Host part of an address.
pub fn extract_ip(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.matches(':').count() {
        0 => addr,
        1 => addr.rsplit_once(':').map_or(addr, |(host, _)| host),
        // Bare IPv6 carries no port
        _ => addr,
    }
}

/// Port part of an address, empty when there is none.
pub fn extract_port(addr: &str) -> &str {
    if addr.starts_with('[') {
        return addr.split_once("]:").map_or("", |(_, port)| port);
    }
    if addr.matches(':').count() == 1 {
        return addr.rsplit_once(':').map_or("", |(_, port)| port);
    }
    ""
}

/// Loopback, link-local and RFC 1918 ranges.
pub fn is_private_ip(ip: &str) -> bool {
    if ip.starts_with("10.") || ip.starts_with("192.168.") {
        return true;
    }
    if let Some(rest) = ip.strip_prefix("172.") {
        if let Some(Ok(second)) = rest.split('.').next().map(str::parse::<u8>) {
            if (16..=31).contains(&second) {
                return true;
            }
        }
    }
    ip.starts_with("127.") || ip == "localhost" || ip.starts_with("fe80:") || ip == "::1"
}

/// True for clearnet addresses worth a geolocation lookup.
pub fn is_public_address(network: &str, ip: &str) -> bool {
    matches!(network, "ipv4" | "ipv6") && !is_private_ip(ip)
}
