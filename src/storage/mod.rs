// Per-node ledger state: chain, UTXO set, mempool and gossip de-dup sets

mod mempool;
mod utxo_set;

pub use mempool::{Mempool, MempoolError};
pub use utxo_set::UtxoSet;

use crate::core::{Block, Hash256, PubkeyHash};
use std::collections::HashSet;

/// Everything one node knows about the ledger. Owned by a single node and
/// mutated under that node's lock only.
#[derive(Debug)]
pub struct LedgerState {
    chain: Vec<Block>,
    utxo_set: UtxoSet,
    pub mempool: Mempool,
    /// Transaction ids already admitted or forwarded by this node
    pub seen_txns: HashSet<Hash256>,
    /// Block hashes already accepted by this node
    pub seen_blocks: HashSet<Hash256>,
}

impl LedgerState {
    /// Fresh state holding only the genesis block
    pub fn new() -> Self {
        Self::with_genesis(Block::genesis())
    }

    pub fn with_genesis(genesis: Block) -> Self {
        let utxo_set = UtxoSet::from_genesis(&genesis);
        let mut seen_blocks = HashSet::new();
        seen_blocks.insert(genesis.hash());
        Self {
            chain: vec![genesis],
            utxo_set,
            mempool: Mempool::new(),
            seen_txns: HashSet::new(),
            seen_blocks,
        }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    /// Latest block; the chain always holds at least the genesis block
    pub fn tip(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    /// Height of the tip (genesis is 0)
    pub fn height(&self) -> u64 {
        self.chain.len() as u64 - 1
    }

    pub fn balance_of(&self, pubkey_hash: &PubkeyHash) -> u64 {
        self.utxo_set.balance_of(pubkey_hash)
    }

    /// Append an already validated block: extend the chain, update the UTXO
    /// set and evict the block's transactions from the mempool together.
    pub fn apply_block(&mut self, block: Block) {
        self.utxo_set.apply_block(&block);
        let evicted = self.mempool.remove_included(&block);
        log::debug!("Block {} evicted {} mempool transactions", block.hash(), evicted);
        self.seen_blocks.insert(block.hash());
        for tx in block.transactions() {
            self.seen_txns.insert(tx.id());
        }
        self.chain.push(block);
    }
}

impl Default for LedgerState {
    fn default() -> Self {
        Self::new()
    }
}
