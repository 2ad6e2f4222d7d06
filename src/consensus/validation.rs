// Transaction and block validation

use crate::consensus::pow::{block_reward, check_proof_of_work, RetargetPolicy};
use crate::core::{script, Block, Hash256, InputSource, OutPoint, Transaction, U256};
use crate::storage::{LedgerState, UtxoSet};
use std::collections::HashSet;
use thiserror::Error;

/// Reasons a transaction or block is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("transaction has no inputs or no outputs")]
    EmptyTransaction,
    #[error("coinbase input outside a block's first transaction")]
    CoinbaseMisuse,
    #[error("input {0} spent twice")]
    DuplicateInput(OutPoint),
    #[error("no unspent outputs for transaction {0}")]
    UnknownTransaction(Hash256),
    #[error("output {0} is not unspent")]
    MissingOutput(OutPoint),
    #[error("script of input {0} did not authorize the spend")]
    ScriptFailed(usize),
    #[error("value overflow")]
    ValueOverflow,
    #[error("outputs worth {outputs} exceed inputs worth {inputs}")]
    Inflation { inputs: u64, outputs: u64 },
    #[error("block has no transactions")]
    EmptyBlock,
    #[error("first transaction is not a coinbase")]
    MissingCoinbase,
    #[error("block declares {declared} transactions but carries {actual}")]
    CountMismatch { declared: usize, actual: usize },
    #[error("block declares size {declared} but serializes to {actual}")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("merkle root does not match transactions")]
    MerkleMismatch,
    #[error("proof of work above target")]
    InsufficientProofOfWork,
    #[error("block target {declared} differs from expected {expected}")]
    UnexpectedTarget { declared: U256, expected: U256 },
    #[error("block builds on {got}, local tip is {expected}")]
    StaleParent { expected: Hash256, got: Hash256 },
    #[error("coinbase pays {claimed}, reward is {allowed}")]
    ExcessiveReward { claimed: u64, allowed: u64 },
    #[error("output {0} spent twice in one block")]
    DoubleSpendInBlock(OutPoint),
}

/// Check every input of `tx` against `utxo_set`.
///
/// Each input must reference an unspent output whose locking script is
/// satisfied by the input's unlocking script, no output may be referenced
/// twice, and the outputs may not be worth more than the inputs.
pub fn check_transaction(tx: &Transaction, utxo_set: &UtxoSet) -> Result<(), ValidationError> {
    if tx.inputs().is_empty() || tx.outputs().is_empty() {
        return Err(ValidationError::EmptyTransaction);
    }

    let mut referenced = HashSet::new();
    let mut input_total = 0u64;
    for (i, input) in tx.inputs().iter().enumerate() {
        let outpoint = match &input.source {
            InputSource::Spend(outpoint) => outpoint,
            InputSource::Coinbase(_) => return Err(ValidationError::CoinbaseMisuse),
        };
        if !referenced.insert(*outpoint) {
            return Err(ValidationError::DuplicateInput(*outpoint));
        }

        let outputs = utxo_set
            .outputs_of(&outpoint.txid)
            .ok_or(ValidationError::UnknownTransaction(outpoint.txid))?;
        let output = outputs
            .iter()
            .find(|out| out.index() == outpoint.index)
            .ok_or(ValidationError::MissingOutput(*outpoint))?;

        if !script::verify_spend(&input.unlocking_script, output.locking_script(), output) {
            return Err(ValidationError::ScriptFailed(i));
        }
        input_total = input_total
            .checked_add(output.value())
            .ok_or(ValidationError::ValueOverflow)?;
    }

    let output_total = tx.total_output_value().ok_or(ValidationError::ValueOverflow)?;
    if output_total > input_total {
        return Err(ValidationError::Inflation {
            inputs: input_total,
            outputs: output_total,
        });
    }
    Ok(())
}

/// Whether `tx` is fully authorized and funded by `utxo_set`
pub fn validate_transaction(tx: &Transaction, utxo_set: &UtxoSet) -> bool {
    match check_transaction(tx, utxo_set) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Transaction {} invalid: {}", tx.id(), e);
            false
        }
    }
}

/// Structural checks that need no ledger context: declared count and size,
/// coinbase placement, merkle commitment and proof of work. The genesis
/// block is trusted and skips the proof-of-work check.
pub fn check_block(block: &Block) -> Result<(), ValidationError> {
    let transactions = block.transactions();
    if transactions.is_empty() {
        return Err(ValidationError::EmptyBlock);
    }
    if block.transaction_count() != transactions.len() {
        return Err(ValidationError::CountMismatch {
            declared: block.transaction_count(),
            actual: transactions.len(),
        });
    }
    let actual_size = block.computed_size();
    if block.size() != actual_size {
        return Err(ValidationError::SizeMismatch {
            declared: block.size(),
            actual: actual_size,
        });
    }

    if !transactions[0].is_coinbase() {
        return Err(ValidationError::MissingCoinbase);
    }
    // Only first transaction can carry a coinbase input
    if transactions[1..]
        .iter()
        .any(|tx| tx.inputs().iter().any(|input| input.is_coinbase()))
    {
        return Err(ValidationError::CoinbaseMisuse);
    }

    if block.compute_merkle_root().ok() != Some(block.header().merkle_root) {
        return Err(ValidationError::MerkleMismatch);
    }

    if !block.is_genesis() && !check_proof_of_work(block.header()) {
        return Err(ValidationError::InsufficientProofOfWork);
    }
    Ok(())
}

/// Whether `block` is structurally sound
pub fn validate_block(block: &Block) -> bool {
    match check_block(block) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Block {} invalid: {}", block.hash(), e);
            false
        }
    }
}

/// Checks against the receiving node's view: the block must extend the
/// local tip with the expected target, its coinbase may not exceed the
/// reward for the new height, and every other transaction must validate
/// against the current UTXO set without spending an output twice.
pub fn check_block_in_context(
    block: &Block,
    state: &LedgerState,
    policy: &dyn RetargetPolicy,
) -> Result<(), ValidationError> {
    let header = block.header();
    let tip = state.tip();
    if header.prev_block_hash != tip.hash() {
        return Err(ValidationError::StaleParent {
            expected: tip.hash(),
            got: header.prev_block_hash,
        });
    }

    let expected = policy.next_target(tip.header().target);
    if header.target != expected {
        return Err(ValidationError::UnexpectedTarget {
            declared: header.target,
            expected,
        });
    }

    let coinbase = block.coinbase().ok_or(ValidationError::MissingCoinbase)?;
    let claimed = coinbase.total_output_value().ok_or(ValidationError::ValueOverflow)?;
    let allowed = block_reward(state.height() + 1);
    if claimed > allowed {
        return Err(ValidationError::ExcessiveReward { claimed, allowed });
    }

    let mut spent = HashSet::new();
    for tx in &block.transactions()[1..] {
        for outpoint in tx.inputs().iter().filter_map(|input| input.outpoint()) {
            if !spent.insert(*outpoint) {
                return Err(ValidationError::DoubleSpendInBlock(*outpoint));
            }
        }
        check_transaction(tx, state.utxo_set())?;
    }
    Ok(())
}

/// Full acceptance test for a block received from a peer
pub fn check_incoming_block(
    block: &Block,
    state: &LedgerState,
    policy: &dyn RetargetPolicy,
) -> Result<(), ValidationError> {
    check_block(block)?;
    check_block_in_context(block, state, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow::{FixedTarget, Miner};
    use crate::core::{
        BlockHeader, KeyPair, PubkeyHash, Script, Serializable, VIn, VOut, GENESIS_SECRET,
    };

    fn easy() -> U256 {
        U256::MAX >> 4
    }

    fn genesis_key() -> KeyPair {
        KeyPair::from_secret_hex(GENESIS_SECRET).unwrap()
    }

    fn genesis_outpoint(state: &LedgerState) -> OutPoint {
        OutPoint::new(state.chain()[0].transactions()[0].id(), 0)
    }

    /// Spend `outpoint` with a P2PKH unlocking script signed by `kp`
    fn signed_spend(kp: &KeyPair, utxo_set: &UtxoSet, outpoint: OutPoint, outputs: Vec<VOut>) -> Transaction {
        let output = utxo_set.get(&outpoint).unwrap();
        let sig = kp.sign(output.serialize().as_bytes());
        let input = VIn::spend(outpoint, Script::p2pkh_unlocking(&sig, &kp.pubkey_hex()));
        Transaction::build(vec![input], outputs)
    }

    fn mined(state: &LedgerState, transactions: Vec<Transaction>) -> Block {
        Miner::default()
            .mine(state.tip().hash(), transactions, easy())
            .unwrap()
            .block
    }

    fn reward_to(pubkey_hash: &PubkeyHash, value: u64) -> Transaction {
        Transaction::coinbase(pubkey_hash, value, "test reward")
    }

    #[test]
    fn test_valid_payment() {
        let state = LedgerState::new();
        let a = genesis_key();
        let b = KeyPair::generate();
        let tx = signed_spend(
            &a,
            state.utxo_set(),
            genesis_outpoint(&state),
            vec![VOut::p2pkh(0, 30, &b.pubkey_hash()), VOut::p2pkh(1, 20, &a.pubkey_hash())],
        );
        assert_eq!(check_transaction(&tx, state.utxo_set()), Ok(()));
        assert!(validate_transaction(&tx, state.utxo_set()));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let state = LedgerState::new();
        let thief = KeyPair::generate();
        let tx = signed_spend(
            &thief,
            state.utxo_set(),
            genesis_outpoint(&state),
            vec![VOut::p2pkh(0, 50, &thief.pubkey_hash())],
        );
        assert_eq!(check_transaction(&tx, state.utxo_set()), Err(ValidationError::ScriptFailed(0)));
        assert!(!validate_transaction(&tx, state.utxo_set()));
    }

    #[test]
    fn test_missing_utxo_rejected() {
        let state = LedgerState::new();
        let a = genesis_key();
        let output = VOut::p2pkh(0, 50, &a.pubkey_hash());
        let sig = a.sign(output.serialize().as_bytes());
        let unknown = OutPoint::new(Hash256::new([8; 32]), 0);
        let tx = Transaction::build(
            vec![VIn::spend(unknown, Script::p2pkh_unlocking(&sig, &a.pubkey_hex()))],
            vec![output],
        );
        assert_eq!(
            check_transaction(&tx, state.utxo_set()),
            Err(ValidationError::UnknownTransaction(unknown.txid))
        );

        let wrong_index = OutPoint::new(genesis_outpoint(&state).txid, 3);
        let tx = Transaction::build(vec![VIn::spend(wrong_index, Script::empty())], vec![VOut::p2pkh(0, 1, &a.pubkey_hash())]);
        assert_eq!(
            check_transaction(&tx, state.utxo_set()),
            Err(ValidationError::MissingOutput(wrong_index))
        );
    }

    #[test]
    fn test_inflation_rejected() {
        let state = LedgerState::new();
        let a = genesis_key();
        let tx = signed_spend(
            &a,
            state.utxo_set(),
            genesis_outpoint(&state),
            vec![VOut::p2pkh(0, 51, &a.pubkey_hash())],
        );
        assert_eq!(
            check_transaction(&tx, state.utxo_set()),
            Err(ValidationError::Inflation { inputs: 50, outputs: 51 })
        );
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let state = LedgerState::new();
        let a = genesis_key();
        let single = signed_spend(&a, state.utxo_set(), genesis_outpoint(&state), vec![]);
        let input = single.inputs()[0].clone();
        let tx = Transaction::build(vec![input.clone(), input], vec![VOut::p2pkh(0, 100, &a.pubkey_hash())]);
        assert_eq!(
            check_transaction(&tx, state.utxo_set()),
            Err(ValidationError::DuplicateInput(genesis_outpoint(&state)))
        );
    }

    #[test]
    fn test_coinbase_cannot_validate_as_payment() {
        let state = LedgerState::new();
        let coinbase = reward_to(&PubkeyHash([1; 20]), 50);
        assert_eq!(check_transaction(&coinbase, state.utxo_set()), Err(ValidationError::CoinbaseMisuse));
    }

    #[test]
    fn test_respelled_unlocking_script_rejected() {
        let state = LedgerState::new();
        let a = genesis_key();
        let outpoint = genesis_outpoint(&state);
        let honest = signed_spend(&a, state.utxo_set(), outpoint, vec![VOut::p2pkh(0, 50, &a.pubkey_hash())]);
        assert!(validate_transaction(&honest, state.utxo_set()));

        let shouting: Script = honest.inputs()[0].unlocking_script.to_string().to_uppercase().parse().unwrap();
        let respelled = Transaction::build(vec![VIn::spend(outpoint, shouting)], honest.outputs().to_vec());
        let relayed = Transaction::deserialize(&respelled.serialize()).unwrap();
        assert_ne!(relayed.id(), honest.id());
        assert_eq!(check_transaction(&relayed, state.utxo_set()), Err(ValidationError::ScriptFailed(0)));
        assert!(!validate_transaction(&relayed, state.utxo_set()));
    }

    #[test]
    fn test_signature_covers_only_the_spent_output() {
        // The signed message is the referenced output, not the spending
        // transaction, so one unlocking script authorizes any spend of it.
        let state = LedgerState::new();
        let a = genesis_key();
        let outpoint = genesis_outpoint(&state);
        let honest = signed_spend(&a, state.utxo_set(), outpoint, vec![VOut::p2pkh(0, 50, &a.pubkey_hash())]);
        let redirected = Transaction::build(
            honest.inputs().to_vec(),
            vec![VOut::p2pkh(0, 50, &PubkeyHash([0xee; 20]))],
        );
        assert_ne!(honest.id(), redirected.id());
        assert!(validate_transaction(&honest, state.utxo_set()));
        assert!(validate_transaction(&redirected, state.utxo_set()));
    }

    #[test]
    fn test_respend_after_block_rejected() {
        let mut state = LedgerState::new();
        let a = genesis_key();
        let b = KeyPair::generate();
        let outpoint = genesis_outpoint(&state);
        let tx = signed_spend(&a, state.utxo_set(), outpoint, vec![VOut::p2pkh(0, 50, &b.pubkey_hash())]);
        let replay = signed_spend(&a, state.utxo_set(), outpoint, vec![VOut::p2pkh(0, 50, &a.pubkey_hash())]);

        let block = mined(&state, vec![reward_to(&b.pubkey_hash(), 50), tx]);
        state.apply_block(block);

        assert_eq!(
            check_transaction(&replay, state.utxo_set()),
            Err(ValidationError::UnknownTransaction(outpoint.txid))
        );
    }

    #[test]
    fn test_structurally_valid_block() {
        let state = LedgerState::new();
        let block = mined(&state, vec![reward_to(&PubkeyHash([1; 20]), 50)]);
        assert_eq!(check_block(&block), Ok(()));
        assert!(validate_block(&block));
        assert!(validate_block(&Block::genesis()));
    }

    #[test]
    fn test_block_without_work_rejected() {
        let coinbase = reward_to(&PubkeyHash([1; 20]), 50);
        let header = BlockHeader::new(1, Hash256::new([1; 32]), coinbase.id(), 0, U256::zero(), 0);
        let block = Block::new(header, vec![coinbase]);
        assert_eq!(check_block(&block), Err(ValidationError::InsufficientProofOfWork));
    }

    #[test]
    fn test_block_structure_mismatches() {
        let state = LedgerState::new();
        let coinbase = reward_to(&PubkeyHash([1; 20]), 50);

        // merkle root committing to something else
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::new([3; 32]), 0, U256::MAX, 0);
        let block = Block::new(header, vec![coinbase.clone()]);
        assert_eq!(check_block(&block), Err(ValidationError::MerkleMismatch));

        // first transaction is not a coinbase
        let a = genesis_key();
        let tx = signed_spend(&a, state.utxo_set(), genesis_outpoint(&state), vec![VOut::p2pkh(0, 5, &a.pubkey_hash())]);
        let header = BlockHeader::new(1, Hash256::zero(), tx.id(), 0, U256::MAX, 0);
        assert_eq!(check_block(&Block::new(header, vec![tx])), Err(ValidationError::MissingCoinbase));

        // two coinbases
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 0, U256::MAX, 0);
        let block = Block::new(header, vec![coinbase.clone(), reward_to(&PubkeyHash([2; 20]), 1)]);
        assert_eq!(check_block(&block), Err(ValidationError::CoinbaseMisuse));

        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 0, U256::MAX, 0);
        assert_eq!(check_block(&Block::new(header, vec![])), Err(ValidationError::EmptyBlock));
    }

    #[test]
    fn test_declared_count_and_size_checked() {
        let state = LedgerState::new();
        let block = mined(&state, vec![reward_to(&PubkeyHash([1; 20]), 50)]);
        let text = block.serialize();

        let lying_size = format!("{},{}]", &text[..text.rfind(',').unwrap()], block.size() + 7);
        let decoded = Block::deserialize(&lying_size).unwrap();
        assert!(matches!(check_block(&decoded), Err(ValidationError::SizeMismatch { .. })));

        let count_field = format!("],{},[", block.transaction_count());
        let lying_count = text.replacen(&count_field, "],2,[", 1);
        let decoded = Block::deserialize(&lying_count).unwrap();
        assert_eq!(
            check_block(&decoded),
            Err(ValidationError::CountMismatch { declared: 2, actual: 1 })
        );
    }

    #[test]
    fn test_block_in_context() {
        let state = LedgerState::new();
        let policy = FixedTarget(easy());
        let a = genesis_key();
        let b = KeyPair::generate();
        let tx = signed_spend(&a, state.utxo_set(), genesis_outpoint(&state), vec![VOut::p2pkh(0, 50, &b.pubkey_hash())]);

        let block = mined(&state, vec![reward_to(&b.pubkey_hash(), 50), tx]);
        assert_eq!(check_incoming_block(&block, &state, &policy), Ok(()));

        // a harder target than the policy expects is still the wrong target
        let strict = FixedTarget(easy() >> 1);
        assert!(matches!(
            check_block_in_context(&block, &state, &strict),
            Err(ValidationError::UnexpectedTarget { .. })
        ));
    }

    #[test]
    fn test_stale_parent_rejected() {
        let mut state = LedgerState::new();
        let policy = FixedTarget(easy());
        let first = mined(&state, vec![reward_to(&PubkeyHash([1; 20]), 50)]);
        let rival = mined(&state, vec![reward_to(&PubkeyHash([2; 20]), 50)]);
        state.apply_block(first.clone());

        assert!(matches!(
            check_incoming_block(&rival, &state, &policy),
            Err(ValidationError::StaleParent { .. })
        ));
        assert!(matches!(
            check_incoming_block(&first, &state, &policy),
            Err(ValidationError::StaleParent { .. })
        ));
    }

    #[test]
    fn test_excessive_reward_rejected() {
        let state = LedgerState::new();
        let block = mined(&state, vec![reward_to(&PubkeyHash([1; 20]), 51)]);
        assert_eq!(
            check_block_in_context(&block, &state, &FixedTarget(easy())),
            Err(ValidationError::ExcessiveReward { claimed: 51, allowed: 50 })
        );
    }

    #[test]
    fn test_double_spend_within_block_rejected() {
        let state = LedgerState::new();
        let a = genesis_key();
        let outpoint = genesis_outpoint(&state);
        let first = signed_spend(&a, state.utxo_set(), outpoint, vec![VOut::p2pkh(0, 50, &a.pubkey_hash())]);
        let second = signed_spend(&a, state.utxo_set(), outpoint, vec![VOut::p2pkh(0, 49, &a.pubkey_hash())]);
        let block = mined(&state, vec![reward_to(&a.pubkey_hash(), 50), first, second]);

        assert_eq!(
            check_block_in_context(&block, &state, &FixedTarget(easy())),
            Err(ValidationError::DoubleSpendInBlock(outpoint))
        );
    }
}
