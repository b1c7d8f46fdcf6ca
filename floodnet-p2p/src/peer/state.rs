//! Reader state machine.
//!
//! Each connection's reader cycles
//! `AwaitingMessage -> Decoding -> Routing -> AwaitingMessage` until the
//! stream ends or fails, at which point it settles in `Closed`.

use std::fmt;

/// State of a connection's reader loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaderState {
    /// Blocked on the next frame.
    #[default]
    AwaitingMessage,
    /// A frame arrived and is being checked.
    Decoding,
    /// A valid message is being routed.
    Routing,
    /// Stream ended or failed. Terminal.
    Closed,
}

impl ReaderState {
    /// Check if the reader has stopped.
    pub fn is_closed(&self) -> bool {
        matches!(self, ReaderState::Closed)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: ReaderState) -> bool {
        use ReaderState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (AwaitingMessage, Decoding) => true,
            (Decoding, Routing) | (Decoding, AwaitingMessage) => true,
            (Routing, AwaitingMessage) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderState::AwaitingMessage => write!(f, "awaiting_message"),
            ReaderState::Decoding => write!(f, "decoding"),
            ReaderState::Routing => write!(f, "routing"),
            ReaderState::Closed => write!(f, "closed"),
        }
    }
}

/// Per-connection reader bookkeeping.
#[derive(Debug, Default)]
pub struct ReaderContext {
    /// Current state of the reader.
    pub state: ReaderState,
    /// Messages decoded and handed to the routing engine.
    pub messages_routed: u64,
    /// Frames discarded for failing validation.
    pub messages_rejected: u64,
}

impl ReaderContext {
    /// Create a new reader context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state. Transitions out of `Closed` are ignored.
    pub fn transition_to(&mut self, new_state: ReaderState) {
        if !self.state.can_transition_to(new_state) {
            tracing::trace!(from = %self.state, to = %new_state, "Ignoring reader transition");
            return;
        }
        tracing::trace!(from = %self.state, to = %new_state, "Reader state transition");
        self.state = new_state;
    }

    /// Record a routed message.
    pub fn record_routed(&mut self) {
        self.messages_routed += 1;
    }

    /// Record a discarded frame.
    pub fn record_rejected(&mut self) {
        self.messages_rejected += 1;
    }
}
