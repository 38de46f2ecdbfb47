//! Parsers for host and guest network facts.
//!
//! Inputs are the raw outputs of `ip neigh show`, `ip -j link show`, dnsmasq
//! lease files, and the guest agent's `guest-network-get-interfaces` reply.

use std::net::{IpAddr, Ipv4Addr};

/// Neighbor states that do not carry a usable address.
const DEAD_NEIGHBOR_STATES: &[&str] = &["FAILED", "INCOMPLETE"];

/// Find the address of `mac` in `ip neigh show` output.
///
/// IPv4 entries win over IPv6 ones; failed and incomplete entries are
/// skipped.
#[must_use]
pub fn neighbor_address(output: &str, mac: &str) -> Option<IpAddr> {
    let mut fallback = None;
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(pos) = fields.iter().position(|f| *f == "lladdr") else {
            continue;
        };
        if !fields
            .get(pos + 1)
            .is_some_and(|m| m.eq_ignore_ascii_case(mac))
        {
            continue;
        }
        if fields.iter().any(|f| DEAD_NEIGHBOR_STATES.contains(f)) {
            continue;
        }
        match fields.first().and_then(|a| a.parse::<IpAddr>().ok()) {
            Some(addr @ IpAddr::V4(_)) => return Some(addr),
            Some(addr) => fallback = fallback.or(Some(addr)),
            None => {}
        }
    }
    fallback
}

/// Find the address leased to `mac` in a dnsmasq lease file.
///
/// Lines read `<expiry> <mac> <ip> <hostname> <client-id>`. When a MAC holds
/// several leases the one with the latest expiry wins.
#[must_use]
pub fn lease_address(content: &str, mac: &str) -> Option<Ipv4Addr> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let expiry: u64 = fields.next()?.parse().ok()?;
            let lease_mac = fields.next()?;
            let addr: Ipv4Addr = fields.next()?.parse().ok()?;
            lease_mac
                .eq_ignore_ascii_case(mac)
                .then_some((expiry, addr))
        })
        .max_by_key(|(expiry, _)| *expiry)
        .map(|(_, addr)| addr)
}

/// Pick the guest's address from a `guest-network-get-interfaces` reply.
///
/// Accepts either the full `{"return": [...]}` reply or the bare array. The
/// interface whose hardware address equals `mac` is preferred; otherwise the
/// first non-loopback IPv4 address of any interface is returned.
#[must_use]
pub fn agent_address(reply: &serde_json::Value, mac: Option<&str>) -> Option<Ipv4Addr> {
    let interfaces = reply
        .get("return")
        .unwrap_or(reply)
        .as_array()?;

    let first_v4 = |iface: &serde_json::Value| -> Option<Ipv4Addr> {
        iface
            .get("ip-addresses")?
            .as_array()?
            .iter()
            .filter(|a| a.get("ip-address-type").and_then(|t| t.as_str()) == Some("ipv4"))
            .filter_map(|a| a.get("ip-address")?.as_str()?.parse::<Ipv4Addr>().ok())
            .find(|a| !a.is_loopback() && !a.is_link_local())
    };

    if let Some(mac) = mac {
        let matched = interfaces.iter().find(|iface| {
            iface
                .get("hardware-address")
                .and_then(|h| h.as_str())
                .is_some_and(|h| h.eq_ignore_ascii_case(mac))
        });
        if let Some(addr) = matched.and_then(first_v4) {
            return Some(addr);
        }
    }
    interfaces.iter().find_map(first_v4)
}

/// Bridge names from `ip -j link show type bridge`.
#[must_use]
pub fn bridge_names(reply: &serde_json::Value) -> Vec<String> {
    reply
        .as_array()
        .map(|links| {
            links
                .iter()
                .filter_map(|l| l.get("ifname")?.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
