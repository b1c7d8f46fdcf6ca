//! Outbound connection establishment.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::error::{P2pError, P2pResult};

/// Dial a peer with a timeout.
pub async fn connect_to_peer(addr: SocketAddr, connect_timeout: Duration) -> P2pResult<TcpStream> {
    tracing::debug!(addr = %addr, "Connecting to peer");

    let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(P2pError::Io(e)),
        Err(_) => return Err(P2pError::ConnectionTimeout { addr }),
    };

    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    tracing::debug!(addr = %addr, "TCP connection established");
    Ok(stream)
}

/// Resolve `host:port`, preferring an IPv4 address.
pub async fn resolve_peer(host: &str, port: u16) -> P2pResult<SocketAddr> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| P2pError::InvalidAddress(format!("{}:{}: {}", host, port, e)))?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| P2pError::InvalidAddress(format!("{}:{} did not resolve", host, port)))
}
