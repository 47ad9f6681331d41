//! Happee - a minimal proof-of-work cryptocurrency node.
//!
//! The node keeps a single chain of blocks, the UTXO set derived from it
//! and a pool of pending transactions. Peers gossip over WebSockets and
//! an HTTP API drives mining, payments and queries.

pub mod core;
pub mod crypto;
pub mod wallet;
pub mod mining;
pub mod network;
pub mod storage;
pub mod cli;
pub mod api;
pub mod consensus;
pub mod node;
pub mod error;
pub mod config;

pub use error::{HappeeError, Result};
pub use node::Node;
