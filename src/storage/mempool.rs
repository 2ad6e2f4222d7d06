// Pool of admitted but unconfirmed transactions

use crate::core::{Block, Hash256, OutPoint, Transaction};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction {0} already in mempool")]
    Duplicate(Hash256),
    #[error("output {outpoint} already claimed by pending transaction {claimed_by}")]
    Conflict { outpoint: OutPoint, claimed_by: Hash256 },
}

/// Insertion-ordered pool, unique by transaction id. No two pending
/// transactions spend the same output.
#[derive(Debug, Default)]
pub struct Mempool {
    order: VecDeque<Transaction>,
    ids: HashSet<Hash256>,
    claimed: HashMap<OutPoint, Hash256>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.ids.contains(txid)
    }

    /// Pending transaction spending `outpoint`, if any
    pub fn claimed_by(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.claimed.get(outpoint).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.order.iter()
    }

    /// Admit a transaction that already validated against the UTXO view
    pub fn insert(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        let txid = tx.id();
        if self.ids.contains(&txid) {
            return Err(MempoolError::Duplicate(txid));
        }
        for outpoint in tx.inputs().iter().filter_map(|input| input.outpoint()) {
            if let Some(claimed_by) = self.claimed_by(outpoint) {
                return Err(MempoolError::Conflict {
                    outpoint: *outpoint,
                    claimed_by,
                });
            }
        }

        for outpoint in tx.inputs().iter().filter_map(|input| input.outpoint()) {
            self.claimed.insert(*outpoint, txid);
        }
        self.ids.insert(txid);
        self.order.push_back(tx);
        Ok(())
    }

    /// Oldest `max` transactions, left in the pool
    pub fn batch(&self, max: usize) -> Vec<Transaction> {
        self.order.iter().take(max).cloned().collect()
    }

    /// Drop every transaction included in `block` and every transaction
    /// that spends an output the block consumed. Returns how many were removed.
    pub fn remove_included(&mut self, block: &Block) -> usize {
        let included: HashSet<Hash256> = block.transactions().iter().map(Transaction::id).collect();
        let spent: HashSet<OutPoint> = block
            .transactions()
            .iter()
            .flat_map(|tx| tx.inputs().iter().filter_map(|input| input.outpoint().copied()))
            .collect();

        let before = self.order.len();
        let (keep, drop): (VecDeque<_>, VecDeque<_>) = self.order.drain(..).partition(|tx| {
            !included.contains(&tx.id())
                && !tx
                    .inputs()
                    .iter()
                    .filter_map(|input| input.outpoint())
                    .any(|outpoint| spent.contains(outpoint))
        });
        self.order = keep;

        for tx in &drop {
            self.ids.remove(&tx.id());
            for outpoint in tx.inputs().iter().filter_map(|input| input.outpoint()) {
                self.claimed.remove(outpoint);
            }
        }
        before - self.order.len()
    }
}
