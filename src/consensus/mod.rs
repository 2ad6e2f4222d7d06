// Consensus and validation logic

pub mod pow;
pub mod validation;

pub use pow::{
    block_reward, check_proof_of_work, initial_target, mine, verify_nonce, FixedTarget, Miner,
    MiningError, MiningResult, RetargetPolicy, Tightening, BASE_REWARD, GENESIS_TIMESTAMP,
    HALVING_INTERVAL, MAX_NONCE, RETARGET_STEP,
};
pub use validation::{
    check_block, check_block_in_context, check_incoming_block, check_transaction, validate_block,
    validate_transaction, ValidationError,
};
