//! File download side-channel.
//!
//! A plain request/response byte stream next to the overlay. The client
//! sends a file ID as 8 hex characters and a newline. The service answers
//! `OK\n\n` followed by the file's bytes, or `ERROR ID (<id>) not found`,
//! and closes the connection either way.

pub mod client;
pub mod service;

pub use client::download;
pub use service::{serve_request, DownloadService};

/// Prefix of a successful reply.
pub const OK_PREFIX: &[u8; 4] = b"OK\n\n";

/// Longest request line accepted, newline included.
pub const MAX_REQUEST_LEN: usize = 64;

/// Error reply for an unknown or unparsable ID.
pub fn not_found_reply(id: &str) -> String {
    format!("ERROR ID ({}) not found", id)
}
