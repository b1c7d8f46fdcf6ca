//! P2P error types.
//!
//! Errors fall into three groups that callers treat differently:
//!
//! - validation errors name a single malformed wire field; the offending
//!   message is dropped and the connection stays up
//! - capacity errors reject a mutation of a Response that would overflow
//!   its count or size limits
//! - everything else (I/O, framing overruns, node-level failures) is fatal
//!   to the connection or operation that produced it

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// P2P-specific errors.
#[derive(Debug, Error)]
pub enum P2pError {
    /// I/O error during network or file operations, including truncated streams.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A wire field failed validation.
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Adding another result would exceed the match count field.
    #[error("Too many results: a response holds at most {max}")]
    TooManyResults { max: usize },

    /// Adding another result would exceed the payload length field.
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A response record scan ran past the largest legal frame.
    #[error("Frame overrun: no complete response within {limit} bytes")]
    FrameOverrun { limit: usize },

    /// Connection timed out.
    #[error("Connection timeout to {addr}")]
    ConnectionTimeout { addr: SocketAddr },

    /// Connection is not (or no longer) registered.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Channel send error.
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Invalid peer or host address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Download server answered with something other than OK.
    #[error("Download refused: {0}")]
    DownloadRefused(String),
}

impl P2pError {
    /// Build a validation error for a named wire field.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        P2pError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending field for validation errors.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            P2pError::InvalidField { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Check if this is a field validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, P2pError::InvalidField { .. })
    }

    /// Check if this is a rejected Response mutation.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            P2pError::TooManyResults { .. } | P2pError::PayloadTooLarge { .. }
        )
    }

    /// Whether the connection that produced this error can keep reading.
    pub fn is_recoverable(&self) -> bool {
        self.is_validation() || self.is_capacity()
    }
}

/// Result type for P2P operations.
pub type P2pResult<T> = Result<T, P2pError>;
