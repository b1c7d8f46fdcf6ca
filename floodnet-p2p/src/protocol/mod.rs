//! Search overlay protocol layer.
//!
//! This module contains:
//! - Search and Response message definitions with their validating constructors
//! - The byte-exact framing codec

pub mod framing;
pub mod messages;

// Re-export main types
pub use framing::{MessageCodec, HEADER_SIZE, MAX_FRAME_SIZE};
pub use messages::{
    checked_ttl, FileId, FileResult, Header, Message, MessageId, MessageType, Response,
    RoutingService, Search, MAX_PAYLOAD_LEN, MAX_RESULTS, MESSAGE_ID_LEN,
};
