// End-to-end ledger scenario: genesis, payment, mining, UTXO update

use mini_ledger::consensus::{block_reward, check_block_in_context, FixedTarget, Miner, MAX_NONCE};
use mini_ledger::core::{KeyPair, OutPoint, PubkeyHash, Transaction, U256, GENESIS_SECRET};
use mini_ledger::{validate_block, validate_transaction, Block, LedgerState, UtxoSet, Wallet};

fn easy_target() -> U256 {
    U256::MAX >> 4
}

fn mine(prev: &Block, transactions: Vec<Transaction>) -> Block {
    Miner::new(MAX_NONCE)
        .mine(prev.hash(), transactions, easy_target())
        .unwrap()
        .block
}

#[test]
fn test_payment_moves_value_between_owners() {
    let genesis = Block::genesis();
    let alice = Wallet::new(KeyPair::from_secret_hex(GENESIS_SECRET).unwrap());
    let bob = KeyPair::generate().pubkey_hash();

    let utxo_set = UtxoSet::from_genesis(&genesis);
    assert_eq!(utxo_set.balance_of(&alice.pubkey_hash()), 50);

    let state = LedgerState::with_genesis(genesis.clone());
    let payment = alice.build_payment(&state, &bob, 30).unwrap();
    assert_eq!(payment.outputs().len(), 2);
    assert!(payment.outputs()[0].is_locked_to(&bob));
    assert_eq!(payment.outputs()[0].value(), 30);
    assert!(payment.outputs()[1].is_locked_to(&alice.pubkey_hash()));
    assert_eq!(payment.outputs()[1].value(), 20);
    assert!(validate_transaction(&payment, &utxo_set));

    let block = mine(&genesis, vec![payment.clone()]);
    let mut after = utxo_set.clone();
    after.apply_block(&block);

    // exactly the two payment outputs remain, the genesis output is gone
    let remaining: Vec<(OutPoint, u64)> = after.iter().map(|(op, out)| (op, out.value())).collect();
    assert_eq!(
        remaining,
        vec![(OutPoint::new(payment.id(), 0), 30), (OutPoint::new(payment.id(), 1), 20)]
    );
    let genesis_coinbase = genesis.transactions()[0].id();
    assert!(after.outputs_of(&genesis_coinbase).is_none());
    assert_eq!(after.balance_of(&bob), 30);
    assert_eq!(after.balance_of(&alice.pubkey_hash()), 20);

    // the spent output cannot be spent again
    assert!(!validate_transaction(&payment, &after));
}

#[test]
fn test_mined_block_extends_state() {
    let mut state = LedgerState::new();
    let alice = Wallet::new(KeyPair::from_secret_hex(GENESIS_SECRET).unwrap());
    let miner = KeyPair::generate().pubkey_hash();
    let bob = PubkeyHash([0xb0; 20]);

    let payment = alice.build_payment(&state, &bob, 30).unwrap();
    state.mempool.insert(payment.clone()).unwrap();

    let coinbase = Transaction::coinbase(&miner, block_reward(1), "Minted at height 1");
    let block = mine(state.tip(), vec![coinbase.clone(), payment.clone()]);
    assert!(validate_block(&block));
    check_block_in_context(&block, &state, &FixedTarget(easy_target())).unwrap();

    state.apply_block(block.clone());
    assert_eq!(state.height(), 1);
    assert_eq!(state.tip().hash(), block.hash());
    assert!(state.mempool.is_empty());
    assert_eq!(state.balance_of(&bob), 30);
    assert_eq!(state.balance_of(&alice.pubkey_hash()), 20);
    assert_eq!(state.balance_of(&miner), 50);
    assert_eq!(state.utxo_set().len(), 2);
    assert!(state.utxo_set().outputs_of(&coinbase.id()).is_some());

    // the same block no longer fits on the new tip
    assert!(check_block_in_context(&block, &state, &FixedTarget(easy_target())).is_err());
}

#[test]
fn test_tampered_block_is_rejected() {
    let genesis = Block::genesis();
    let miner = PubkeyHash([0x11; 20]);
    let honest = mine(&genesis, vec![Transaction::coinbase(&miner, 50, "honest")]);
    assert!(validate_block(&honest));

    // swap the transactions under the mined header
    let forged = Block::new(
        honest.header().clone(),
        vec![Transaction::coinbase(&miner, 50, "forged")],
    );
    assert!(!validate_block(&forged));
}
