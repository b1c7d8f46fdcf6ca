//! Command-line argument parsing.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

use floodnet_p2p::config::DEFAULT_INITIAL_TTL;
use floodnet_p2p::protocol::checked_ttl;
use floodnet_p2p::RoutingService;

/// Flood-search overlay node.
#[derive(Parser, Debug, Clone)]
#[command(name = "floodnet-node")]
#[command(about = "Peer-to-peer file search node")]
#[command(version)]
pub struct Cli {
    /// Port to accept peer connections on.
    pub node_port: u16,

    /// Directory of files to share.
    pub shared_dir: PathBuf,

    /// Port to serve file downloads on.
    pub download_port: u16,

    /// IPv4 address advertised to peers as the download host.
    #[arg(long, default_value = "127.0.0.1")]
    pub advertise: Ipv4Addr,

    /// TTL given to searches started here.
    #[arg(long, default_value_t = DEFAULT_INITIAL_TTL, value_parser = parse_ttl)]
    pub ttl: u8,

    /// Routing service tag put on outgoing messages.
    #[arg(long, default_value = "breadth-first")]
    pub routing: RoutingService,

    /// Peer to dial at startup, as host:port. May be repeated.
    #[arg(long = "connect", value_name = "HOST:PORT")]
    pub peers: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn parse_ttl(s: &str) -> Result<u8, String> {
    let value: i64 = s.parse().map_err(|e| format!("ttl: {}", e))?;
    checked_ttl(value).map_err(|e| e.to_string())
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Expand the shared directory path (handle ~ for home).
    pub fn expanded_shared_dir(&self) -> PathBuf {
        let path_str = self.shared_dir.to_string_lossy();
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        }
        self.shared_dir.clone()
    }
}
