//! P2P file search overlay.
//!
//! A node keeps symmetric TCP connections to other nodes, floods searches
//! across them and routes the answers back. This crate provides:
//!
//! - The binary wire codec for Search and Response messages
//! - TTL-bounded flood routing with local search recognition
//! - Per-connection reader and single-writer tasks
//! - The shared file index and the file download side-channel
//!
//! # Architecture
//!
//! Each connection runs in its own tokio task. The reader decodes one
//! message at a time and routes it inline, so messages from one peer are
//! handled in arrival order. Routing never writes to a socket directly; it
//! queues messages on the destination connection's writer task.
//!
//! ```text
//! Main Task (FloodNode::run())
//! ├── Accept loop (inbound connections)
//! ├── Connection Task 1 (reader loop + writer task)
//! ├── Connection Task 2 (reader loop + writer task)
//! └── ...
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use floodnet_p2p::{FloodNode, P2pConfig};
//!
//! let config = P2pConfig::new("0.0.0.0:5000".parse().unwrap())
//!     .with_shared_dir("./shared");
//!
//! let mut node = FloodNode::new(config).await?;
//! let handle = node.handle();
//! let mut reports = node.reports().unwrap();
//! tokio::spawn(node.run());
//!
//! handle.connect("10.0.0.2:5000".parse().unwrap()).await?;
//! handle.search("bob").await?;
//! while let Some(report) = reports.recv().await {
//!     println!("{}", report);
//! }
//! ```

pub mod config;
pub mod error;

pub mod protocol;
pub mod peer;
pub mod manager;
pub mod routing;
pub mod files;
pub mod download;
pub mod node;

// Re-export main types
pub use config::P2pConfig;
pub use error::{P2pError, P2pResult};
pub use files::FileIndex;
pub use node::{FloodNode, NodeHandle};
pub use peer::{ConnectionDirection, ConnectionId, ConnectionInfo};
pub use protocol::{FileId, Message, MessageId, Response, RoutingService, Search};
pub use routing::{RouteOutcome, RoutingEngine, SearchReport};
