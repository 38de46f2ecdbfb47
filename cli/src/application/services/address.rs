//! Guest address resolver.
//!
//! Tries, in order, the guest agent, the host neighbor table, and the DHCP
//! lease files. The first hit wins. Exhausting the chain yields `None`,
//! which callers report as "unknown" rather than as an error.

use std::net::IpAddr;

use idve_common::InstanceRecord;

use crate::application::ports::{CommandRunner, GuestChannel, HostFs};
use crate::domain::config::IdveConfig;
use crate::domain::network::{agent_address, lease_address, neighbor_address};

/// Best-effort discovery of the guest's network address.
pub async fn resolve(
    host: &(impl CommandRunner + HostFs + GuestChannel),
    cfg: &IdveConfig,
    record: &InstanceRecord,
) -> Option<IpAddr> {
    let mac = record.primary_mac();

    if record.hardware.guest_agent {
        if let Some(addr) = from_agent(host, cfg, record, mac).await {
            tracing::debug!(instance = %record.id, %addr, source = "guest-agent", "address resolved");
            return Some(addr);
        }
    }

    let mac = mac?;

    if let Some(addr) = from_neighbors(host, cfg, mac).await {
        tracing::debug!(instance = %record.id, %addr, source = "neighbor", "address resolved");
        return Some(addr);
    }

    for lease_file in &cfg.network.lease_files {
        let Ok(content) = host.read_to_string(lease_file).await else {
            continue;
        };
        if let Some(addr) = lease_address(&content, mac) {
            tracing::debug!(instance = %record.id, %addr, source = "dhcp-lease", "address resolved");
            return Some(IpAddr::V4(addr));
        }
    }

    tracing::debug!(instance = %record.id, "address unknown");
    None
}

async fn from_agent(
    host: &(impl HostFs + GuestChannel),
    cfg: &IdveConfig,
    record: &InstanceRecord,
    mac: Option<&str>,
) -> Option<IpAddr> {
    let socket = cfg.paths.agent_socket(&record.id);
    if !host.exists(&socket).await {
        return None;
    }
    match host
        .agent_command(&socket, "guest-network-get-interfaces")
        .await
    {
        Ok(reply) => agent_address(&reply, mac).map(IpAddr::V4),
        Err(e) => {
            tracing::debug!(instance = %record.id, error = %e, "guest agent query failed");
            None
        }
    }
}

async fn from_neighbors(runner: &impl CommandRunner, cfg: &IdveConfig, mac: &str) -> Option<IpAddr> {
    let output = runner
        .run(&cfg.binaries.ip, &["neigh", "show"])
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    neighbor_address(&String::from_utf8_lossy(&output.stdout), mac)
}
