//! Peer connection handling.
//!
//! This module provides:
//! - Connection identification and metadata
//! - Reader state machine
//! - Per-connection reader loop and single-writer sender

pub mod connection;
pub mod info;
pub mod sender;
pub mod state;

// Re-export main types
pub use connection::{run_reader, spawn_connection};
pub use info::{ConnectionDirection, ConnectionId, ConnectionInfo};
pub use sender::{run_writer, PeerCommand};
pub use state::{ReaderContext, ReaderState};
