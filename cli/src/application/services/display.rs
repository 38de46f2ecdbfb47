//! Port allocator for the display proxy.

use anyhow::Result;

use crate::application::ports::PortProbe;
use crate::domain::InstanceError;

/// Find a free proxy port by probing upward from `start`.
///
/// Probing is sequential and stops at the first free port.
///
/// # Errors
///
/// Returns `InstanceError::PortsExhausted` once `attempts` ports were busy.
pub async fn allocate_proxy_port(probe: &impl PortProbe, start: u16, attempts: u16) -> Result<u16> {
    let last = start.saturating_add(attempts.saturating_sub(1));
    for port in start..=last {
        if probe.is_free(port).await {
            tracing::debug!(port, "proxy port allocated");
            return Ok(port);
        }
        tracing::debug!(port, "proxy port busy");
    }
    Err(InstanceError::PortsExhausted { first: start, last }.into())
}
