// UTXO (Unspent Transaction Output) set management

use crate::core::{Block, Hash256, OutPoint, PubkeyHash, VOut};
use std::collections::{BTreeMap, HashMap};

/// Transaction id -> still-unspent outputs of that transaction.
/// An entry never holds an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: BTreeMap<Hash256, Vec<VOut>>,
}

impl UtxoSet {
    /// Create an empty UTXO set
    pub fn new() -> Self {
        Self::default()
    }

    /// UTXO set holding exactly the outputs created by `genesis`
    pub fn from_genesis(genesis: &Block) -> Self {
        let mut utxo_set = Self::new();
        utxo_set.apply_block(genesis);
        utxo_set
    }

    /// Unspent outputs of a transaction
    pub fn outputs_of(&self, txid: &Hash256) -> Option<&[VOut]> {
        self.entries.get(txid).map(Vec::as_slice)
    }

    /// Look up a single unspent output by its declared index
    pub fn get(&self, outpoint: &OutPoint) -> Option<&VOut> {
        self.entries
            .get(&outpoint.txid)?
            .iter()
            .find(|out| out.index() == outpoint.index)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }

    /// Number of transactions with at least one unspent output
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of individual unspent outputs
    pub fn output_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OutPoint, &VOut)> {
        self.entries.iter().flat_map(|(txid, outputs)| {
            outputs.iter().map(move |out| (OutPoint::new(*txid, out.index()), out))
        })
    }

    /// Apply an accepted block.
    ///
    /// Consumed outputs are removed first, grouped by the transaction that
    /// created them, and an entry whose list becomes empty is dropped. Then
    /// every transaction of the block is inserted with its full output list.
    pub fn apply_block(&mut self, block: &Block) {
        let mut consumed: HashMap<Hash256, Vec<u32>> = HashMap::new();
        for tx in block.transactions() {
            for outpoint in tx.inputs().iter().filter_map(|input| input.outpoint()) {
                consumed.entry(outpoint.txid).or_default().push(outpoint.index);
            }
        }

        for (txid, indices) in consumed {
            let now_empty = match self.entries.get_mut(&txid) {
                Some(outputs) => {
                    outputs.retain(|out| !indices.contains(&out.index()));
                    outputs.is_empty()
                }
                None => {
                    log::warn!("Block {} spends unknown transaction {}", block.hash(), txid);
                    false
                }
            };
            if now_empty {
                self.entries.remove(&txid);
            }
        }

        for tx in block.transactions() {
            if !tx.outputs().is_empty() {
                self.entries.insert(tx.id(), tx.outputs().to_vec());
            }
        }
    }

    /// Sum of unspent outputs whose locking script pays `pubkey_hash`
    pub fn balance_of(&self, pubkey_hash: &PubkeyHash) -> u64 {
        self.iter()
            .filter(|(_, out)| out.is_locked_to(pubkey_hash))
            .fold(0u64, |acc, (_, out)| acc.saturating_add(out.value()))
    }

    /// Unspent outputs payable to `pubkey_hash`
    pub fn spendable_for(&self, pubkey_hash: &PubkeyHash) -> Vec<(OutPoint, VOut)> {
        self.iter()
            .filter(|(_, out)| out.is_locked_to(pubkey_hash))
            .map(|(outpoint, out)| (outpoint, out.clone()))
            .collect()
    }
}
