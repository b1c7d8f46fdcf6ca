//! Connection registry.
//!
//! Owns the set of live connections (accepted and dialed alike) and fans
//! messages out to them. Every fan-out iterates a point-in-time snapshot
//! taken under a short lock; a connection that goes away mid-fan-out only
//! costs a failed, logged send.

pub mod inbound;
pub mod outbound;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};

use crate::error::{P2pError, P2pResult};
use crate::peer::{ConnectionId, ConnectionInfo, PeerCommand};
use crate::protocol::Message;

pub use inbound::InboundListener;
pub use outbound::{connect_to_peer, resolve_peer};

/// Sending side of one registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    info: ConnectionInfo,
    command_tx: mpsc::UnboundedSender<PeerCommand>,
}

impl ConnectionHandle {
    /// Create a handle around a writer's command channel.
    pub fn new(info: ConnectionInfo, command_tx: mpsc::UnboundedSender<PeerCommand>) -> Self {
        Self { info, command_tx }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    /// Connection metadata.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Queue a message for this connection's writer.
    /// Uses an unbounded channel so this never blocks.
    pub fn send(&self, message: Message) -> P2pResult<()> {
        self.command_tx
            .send(PeerCommand::Send(message))
            .map_err(|_| P2pError::ChannelSend(format!("{} writer closed", self.info.id)))
    }

    /// Ask the writer to flush what is queued and close.
    pub fn disconnect(&self) -> P2pResult<()> {
        self.command_tx
            .send(PeerCommand::Disconnect)
            .map_err(|_| P2pError::ChannelSend(format!("{} writer closed", self.info.id)))
    }
}

/// Shared set of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a new connection ID.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a live connection.
    pub async fn register(&self, handle: ConnectionHandle) {
        tracing::debug!(conn = %handle.id(), addr = %handle.info().addr, "Registering connection");
        self.connections.lock().await.insert(handle.id(), handle);
    }

    /// Remove a connection.
    pub async fn deregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let removed = self.connections.lock().await.remove(&id);
        if removed.is_some() {
            tracing::debug!(conn = %id, "Deregistered connection");
        }
        removed
    }

    /// Copy of the current connection set.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.lock().await.values().cloned().collect()
    }

    /// Metadata for every live connection, ordered by ID.
    pub async fn infos(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self
            .snapshot()
            .await
            .into_iter()
            .map(|h| h.info)
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Check if no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Check if a connection is registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    /// Send a message to one connection.
    pub async fn send_to(&self, id: ConnectionId, message: Message) -> P2pResult<()> {
        let handle = self
            .connections
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| P2pError::ConnectionNotFound(id.to_string()))?;
        handle.send(message)
    }

    /// Send a message to every connection. Returns how many accepted it.
    pub async fn broadcast(&self, message: Message) -> usize {
        self.fan_out(message, None).await
    }

    /// Send a message to every connection except one. Returns how many accepted it.
    pub async fn broadcast_except(&self, message: Message, exclude: ConnectionId) -> usize {
        self.fan_out(message, Some(exclude)).await
    }

    async fn fan_out(&self, message: Message, exclude: Option<ConnectionId>) -> usize {
        let mut sent = 0;
        for handle in self.snapshot().await {
            if Some(handle.id()) == exclude {
                continue;
            }
            match handle.send(message.clone()) {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::debug!(conn = %handle.id(), error = %e, "Failed to fan out to connection");
                }
            }
        }
        sent
    }

    /// Tell every writer to close. The set itself drains as readers exit.
    pub async fn disconnect_all(&self) {
        for handle in self.snapshot().await {
            let _ = handle.disconnect();
        }
    }
}
