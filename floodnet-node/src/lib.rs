//! Flood-search overlay node library.
//!
//! This library provides the components for building and running a search
//! node. It is used by the `floodnet-node` binary and can also be used for
//! testing and embedding.

pub mod cli;
pub mod config;
pub mod node;
pub mod shell;
pub mod shutdown;
