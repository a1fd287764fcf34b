//! Message passing for the SPMD balancing pass: point-to-point endpoints,
//! tree collectives, and the pairwise interface exchange.

pub mod communicator;
pub mod interface;
pub mod tree;

use thiserror::Error;

/// Failures of the communication layer itself (encoding, protocol shape).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    /// A payload failed to encode/decode or had the wrong shape.
    #[error("codec failure: {0}")]
    Codec(String),
}

pub use communicator::{Communicator, LocalComm, LocalUniverse, NoComm, Wait};
pub use interface::{exchange, Interface};
pub use tree::{GatherToken, ProcessTree, TreeComm};
