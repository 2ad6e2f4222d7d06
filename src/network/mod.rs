// P2P networking

mod config;
mod message;
mod node;
pub mod peer;

pub use config::{NodeConfig, Role};
pub use message::{Envelope, Message, MessageType, PeerEntry};
pub use node::{Node, NodeHandle};
pub use peer::PeerTable;

use crate::consensus::{MiningError, ValidationError};
use crate::core::keys::KeyError;
use crate::core::ParseError;
use crate::storage::MempoolError;
use crate::wallet::WalletError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a node or its transport
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("no free listen port after {0} attempts")]
    BindExhausted(u32),
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Mining(#[from] MiningError),
    #[error("node has no wallet")]
    NoWallet,
    #[error("background task failed: {0}")]
    Task(String),
}
