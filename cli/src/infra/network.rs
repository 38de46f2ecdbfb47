//! Loopback port probe: implements the `PortProbe` port.

use std::net::{Ipv4Addr, SocketAddr};

use crate::application::ports::PortProbe;

/// Probes by binding a listener and dropping it immediately.
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    async fn is_free(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        tokio::net::TcpListener::bind(addr).await.is_ok()
    }
}
