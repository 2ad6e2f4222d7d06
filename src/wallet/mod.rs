// Wallet capability: one key pair able to compose payments

mod tx_builder;

pub use tx_builder::{TransactionBuilder, WalletError};

use crate::core::{KeyPair, PubkeyHash, Transaction};
use crate::storage::LedgerState;

/// Key pair owned by a wallet-capable node
#[derive(Debug, Clone)]
pub struct Wallet {
    keypair: KeyPair,
}

impl Wallet {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Wallet with a freshly generated key
    pub fn generate() -> Self {
        Self::new(KeyPair::generate())
    }

    pub fn pubkey_hash(&self) -> PubkeyHash {
        self.keypair.pubkey_hash()
    }

    pub fn address(&self) -> &str {
        self.keypair.address()
    }

    /// Confirmed balance in `state`
    pub fn balance(&self, state: &LedgerState) -> u64 {
        state.balance_of(&self.pubkey_hash())
    }

    /// Pay `amount` to `to` from outputs that are confirmed in `state` and
    /// not yet claimed by its mempool
    pub fn build_payment(
        &self,
        state: &LedgerState,
        to: &PubkeyHash,
        amount: u64,
    ) -> Result<Transaction, WalletError> {
        TransactionBuilder::new(&self.keypair, state.utxo_set())
            .with_mempool(&state.mempool)
            .build(to, amount)
    }
}
