// Mini ledger - a minimal proof-of-work ledger network

pub mod core;
pub mod consensus;
pub mod storage;
pub mod network;
pub mod wallet;
mod cli;

// Re-exports for convenience
pub use core::{Block, BlockHeader, Hash256, OutPoint, PubkeyHash, Script, Transaction, VIn, VOut};
pub use consensus::{validate_block, validate_transaction, Miner, ValidationError};
pub use storage::{LedgerState, Mempool, UtxoSet};
pub use network::{Message, Node, NodeConfig, NodeError, Role};
pub use wallet::Wallet;
pub use cli::{Cli, CliHandler, Commands};
