//! Node configuration.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

use floodnet_p2p::config::{DEFAULT_DOWNLOAD_PORT, DEFAULT_INITIAL_TTL, DEFAULT_NODE_PORT};
use floodnet_p2p::{P2pConfig, RoutingService};

use crate::cli::Cli;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Peer listen address.
    pub node_addr: SocketAddr,

    /// Shared directory.
    pub shared_dir: PathBuf,

    /// Download port.
    pub download_port: u16,

    /// Address advertised as the download host.
    pub advertise: Ipv4Addr,

    /// TTL for local searches.
    pub initial_ttl: u8,

    /// Routing service tag.
    pub routing_service: RoutingService,

    /// Peers to dial at startup, as host:port.
    pub peers: Vec<String>,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            node_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.node_port)),
            shared_dir: cli.expanded_shared_dir(),
            download_port: cli.download_port,
            advertise: cli.advertise,
            initial_ttl: cli.ttl,
            routing_service: cli.routing,
            peers: cli.peers.clone(),
            log_level: cli.log_level.clone(),
        }
    }

    /// Address the download service binds to.
    pub fn download_bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.download_port))
    }

    /// Build P2P configuration from node config.
    ///
    /// `download_port` is the port the download service actually bound,
    /// which differs from the configured one when that was 0.
    pub fn p2p_config(&self, download_port: u16) -> P2pConfig {
        P2pConfig::new(self.node_addr)
            .with_shared_dir(self.shared_dir.clone())
            .with_download_addr(SocketAddrV4::new(self.advertise, download_port))
            .with_initial_ttl(self.initial_ttl)
            .with_routing_service(self.routing_service)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_NODE_PORT)),
            shared_dir: PathBuf::from("."),
            download_port: DEFAULT_DOWNLOAD_PORT,
            advertise: Ipv4Addr::LOCALHOST,
            initial_ttl: DEFAULT_INITIAL_TTL,
            routing_service: RoutingService::BreadthFirst,
            peers: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}
