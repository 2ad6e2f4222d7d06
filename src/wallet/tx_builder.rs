// Transaction builder

use crate::core::{KeyPair, OutPoint, PubkeyHash, Script, Serializable, Transaction, VIn, VOut};
use crate::storage::{Mempool, UtxoSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("payment amount must be positive")]
    ZeroAmount,
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
}

/// Composes signed P2PKH payments from one key's unspent outputs
pub struct TransactionBuilder<'a> {
    keypair: &'a KeyPair,
    utxo_set: &'a UtxoSet,
    mempool: Option<&'a Mempool>,
}

impl<'a> TransactionBuilder<'a> {
    /// Create a new transaction builder
    pub fn new(keypair: &'a KeyPair, utxo_set: &'a UtxoSet) -> Self {
        Self {
            keypair,
            utxo_set,
            mempool: None,
        }
    }

    /// Skip outputs already claimed by pending transactions
    pub fn with_mempool(mut self, mempool: &'a Mempool) -> Self {
        self.mempool = Some(mempool);
        self
    }

    /// Build a transaction paying `amount` to `to`, returning change to
    /// the sender. Output 0 is the payment, output 1 the change if any.
    pub fn build(&self, to: &PubkeyHash, amount: u64) -> Result<Transaction, WalletError> {
        if amount == 0 {
            return Err(WalletError::ZeroAmount);
        }

        let (selected, total_input) = self.select_utxos(amount)?;

        // Each input signs the serialization of the output it spends
        let inputs: Vec<VIn> = selected
            .iter()
            .map(|(outpoint, output)| {
                let signature = self.keypair.sign(output.serialize().as_bytes());
                VIn::spend(
                    *outpoint,
                    Script::p2pkh_unlocking(&signature, &self.keypair.pubkey_hex()),
                )
            })
            .collect();

        let mut outputs = vec![VOut::p2pkh(0, amount, to)];
        let change = total_input - amount;
        if change > 0 {
            outputs.push(VOut::p2pkh(1, change, &self.keypair.pubkey_hash()));
        }

        Ok(Transaction::build(inputs, outputs))
    }

    /// Select UTXOs to cover amount, oldest entries first
    fn select_utxos(&self, target: u64) -> Result<(Vec<(OutPoint, VOut)>, u64), WalletError> {
        let mut selected = Vec::new();
        let mut total = 0u64;

        for (outpoint, output) in self.utxo_set.spendable_for(&self.keypair.pubkey_hash()) {
            if self.mempool.is_some_and(|pool| pool.claimed_by(&outpoint).is_some()) {
                continue;
            }
            total = total.saturating_add(output.value());
            selected.push((outpoint, output));

            if total >= target {
                return Ok((selected, total));
            }
        }

        Err(WalletError::InsufficientFunds {
            needed: target,
            available: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::validate_transaction;
    use crate::core::GENESIS_SECRET;
    use crate::storage::LedgerState;

    fn genesis_key() -> KeyPair {
        KeyPair::from_secret_hex(GENESIS_SECRET).unwrap()
    }

    #[test]
    fn test_build_payment_with_change() {
        let state = LedgerState::new();
        let sender = genesis_key();
        let recipient = KeyPair::generate();

        let tx = TransactionBuilder::new(&sender, state.utxo_set())
            .build(&recipient.pubkey_hash(), 30)
            .unwrap();

        assert_eq!(tx.inputs().len(), 1);
        assert_eq!(tx.outputs().len(), 2);
        assert_eq!(tx.outputs()[0].value(), 30);
        assert!(tx.outputs()[0].is_locked_to(&recipient.pubkey_hash()));
        assert_eq!(tx.outputs()[1].value(), 20);
        assert!(tx.outputs()[1].is_locked_to(&sender.pubkey_hash()));
        assert!(validate_transaction(&tx, state.utxo_set()));
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let state = LedgerState::new();
        let tx = TransactionBuilder::new(&genesis_key(), state.utxo_set())
            .build(&PubkeyHash([1; 20]), 50)
            .unwrap();
        assert_eq!(tx.outputs().len(), 1);
    }

    #[test]
    fn test_insufficient_funds() {
        let state = LedgerState::new();
        let key = KeyPair::generate();
        let builder = TransactionBuilder::new(&key, state.utxo_set());
        assert_eq!(
            builder.build(&PubkeyHash([1; 20]), 1),
            Err(WalletError::InsufficientFunds { needed: 1, available: 0 })
        );

        let sender = genesis_key();
        let builder = TransactionBuilder::new(&sender, state.utxo_set());
        assert_eq!(
            builder.build(&PubkeyHash([1; 20]), 51),
            Err(WalletError::InsufficientFunds { needed: 51, available: 50 })
        );
        assert_eq!(builder.build(&PubkeyHash([1; 20]), 0), Err(WalletError::ZeroAmount));
    }

    #[test]
    fn test_claimed_outputs_are_skipped() {
        let mut state = LedgerState::new();
        let sender = genesis_key();
        let first = TransactionBuilder::new(&sender, state.utxo_set())
            .build(&PubkeyHash([1; 20]), 10)
            .unwrap();
        state.mempool.insert(first).unwrap();

        let second = TransactionBuilder::new(&sender, state.utxo_set())
            .with_mempool(&state.mempool)
            .build(&PubkeyHash([1; 20]), 10);
        assert_eq!(second, Err(WalletError::InsufficientFunds { needed: 10, available: 0 }));
    }
}
