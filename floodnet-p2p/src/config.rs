//! P2P configuration.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::RoutingService;

/// Default node listen port.
pub const DEFAULT_NODE_PORT: u16 = 5000;

/// Default download service port.
pub const DEFAULT_DOWNLOAD_PORT: u16 = 5001;

/// Default TTL for locally initiated searches.
pub const DEFAULT_INITIAL_TTL: u8 = 50;

/// Default TTL for responses built by this node.
pub const DEFAULT_RESPONSE_TTL: u8 = 50;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for each connection task.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Configuration for a search overlay node.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Address to bind the node listener to.
    pub bind_addr: SocketAddr,

    /// Download address advertised in every Response this node builds.
    pub download_addr: SocketAddrV4,

    /// Directory whose files are shared and matched against searches.
    pub shared_dir: PathBuf,

    /// TTL given to locally initiated searches.
    pub initial_ttl: u8,

    /// TTL given to Responses this node answers with.
    pub response_ttl: u8,

    /// Routing service tag put on locally built messages.
    pub routing_service: RoutingService,

    /// Timeout for establishing outbound connections.
    pub connect_timeout: Duration,

    /// How long shutdown waits for each connection task to finish.
    pub shutdown_grace: Duration,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_NODE_PORT)),
            download_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_DOWNLOAD_PORT),
            shared_dir: PathBuf::from("."),
            initial_ttl: DEFAULT_INITIAL_TTL,
            response_ttl: DEFAULT_RESPONSE_TTL,
            routing_service: RoutingService::BreadthFirst,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl P2pConfig {
    /// Create a new configuration with the specified bind address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Set the advertised download address.
    pub fn with_download_addr(mut self, addr: SocketAddrV4) -> Self {
        self.download_addr = addr;
        self
    }

    /// Set the shared directory.
    pub fn with_shared_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared_dir = dir.into();
        self
    }

    /// Set the TTL for locally initiated searches.
    pub fn with_initial_ttl(mut self, ttl: u8) -> Self {
        self.initial_ttl = ttl;
        self
    }

    /// Set the TTL for locally built responses.
    pub fn with_response_ttl(mut self, ttl: u8) -> Self {
        self.response_ttl = ttl;
        self
    }

    /// Set the routing service tag.
    pub fn with_routing_service(mut self, routing: RoutingService) -> Self {
        self.routing_service = routing;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
