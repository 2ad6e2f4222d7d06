// Proof of Work implementation

use crate::core::{merkle_root, pow_hash_with, Block, BlockHeader, Hash256, Transaction, U256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Reward minted by the coinbase of the first block
pub const BASE_REWARD: u64 = 50;
/// Blocks between reward halvings
pub const HALVING_INTERVAL: u64 = 210;
/// Genesis block timestamp
pub const GENESIS_TIMESTAMP: u64 = 1694692863;
/// Nonces tried per timestamp before the header is refreshed
pub const MAX_NONCE: u64 = 1_000_000;
/// Each block tightens the target by `target / RETARGET_STEP`
pub const RETARGET_STEP: u64 = 500_000;
/// Header version written by this miner
pub const BLOCK_VERSION: u32 = 1;

/// Target of the genesis block: 2^237
pub fn initial_target() -> U256 {
    U256::one() << 237
}

/// Coinbase reward for a block at `height` (genesis is height 0).
/// Halves every `HALVING_INTERVAL` blocks using integer shifts and reaches
/// zero after 64 halvings.
pub fn block_reward(height: u64) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        0
    } else {
        BASE_REWARD >> halvings
    }
}

/// Whether a header's proof-of-work hash is below its declared target
pub fn check_proof_of_work(header: &BlockHeader) -> bool {
    header.meets_target()
}

/// Independent check of a nonce against a pre-serialized header
pub fn verify_nonce(header_without_nonce: &str, nonce: u64, target: &U256) -> bool {
    pow_hash_with(header_without_nonce, nonce).to_u256() < *target
}

/// Decides the target of the next block from the target of the current tip
pub trait RetargetPolicy: Send + Sync + std::fmt::Debug {
    fn next_target(&self, previous: U256) -> U256;
}

/// Multiplicative tightening: `previous - previous / step`
#[derive(Debug, Clone, Copy)]
pub struct Tightening {
    pub step: u64,
}

impl Default for Tightening {
    fn default() -> Self {
        Self { step: RETARGET_STEP }
    }
}

impl RetargetPolicy for Tightening {
    fn next_target(&self, previous: U256) -> U256 {
        if self.step == 0 {
            return previous;
        }
        previous - previous / U256::from(self.step)
    }
}

/// Every block uses the same target
#[derive(Debug, Clone, Copy)]
pub struct FixedTarget(pub U256);

impl RetargetPolicy for FixedTarget {
    fn next_target(&self, _previous: U256) -> U256 {
        self.0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("cannot mine a block without transactions")]
    EmptyBlock,
    #[error("mining cancelled")]
    Cancelled,
}

/// Proof of Work miner
#[derive(Debug, Clone)]
pub struct Miner {
    /// Nonces tried per timestamp, at least one
    max_nonce: u64,
    stop: Option<Arc<AtomicBool>>,
}

impl Default for Miner {
    fn default() -> Self {
        Self {
            max_nonce: MAX_NONCE,
            stop: None,
        }
    }
}

impl Miner {
    pub fn new(max_nonce: u64) -> Self {
        Self {
            max_nonce: max_nonce.max(1),
            stop: None,
        }
    }

    /// Abort the search once `stop` is set
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stopped(&self) -> bool {
        self.stop.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Search for a nonce whose header hash is below `target`.
    ///
    /// Nonces `0..max_nonce` are tried for the current timestamp; when the
    /// range is exhausted the timestamp moves forward and the search starts
    /// over, so a block is always produced unless cancelled.
    pub fn mine(
        &self,
        prev_block_hash: Hash256,
        transactions: Vec<Transaction>,
        target: U256,
    ) -> Result<MiningResult, MiningError> {
        let ids: Vec<Hash256> = transactions.iter().map(Transaction::id).collect();
        let merkle = merkle_root(&ids).map_err(|_| MiningError::EmptyBlock)?;

        let start_time = Instant::now();
        let mut attempts = 0u64;
        let mut timestamp = unix_now();
        let mut header = BlockHeader::new(BLOCK_VERSION, prev_block_hash, merkle, timestamp, target, 0);

        loop {
            let preimage = header.serialize_without_nonce();
            for nonce in 0..self.max_nonce {
                attempts += 1;
                if pow_hash_with(&preimage, nonce).to_u256() < target {
                    header.nonce = nonce;
                    return Ok(MiningResult {
                        block: Block::new(header, transactions),
                        attempts,
                        duration: start_time.elapsed(),
                    });
                }

                if attempts % 100_000 == 0 {
                    if self.stopped() {
                        return Err(MiningError::Cancelled);
                    }
                    let elapsed = start_time.elapsed();
                    log::debug!("Mining attempts: {} ({:.1} KH/s)",
                        attempts,
                        attempts as f64 / elapsed.as_secs_f64() / 1000.0
                    );
                }
            }

            if self.stopped() {
                return Err(MiningError::Cancelled);
            }
            timestamp = unix_now().max(timestamp + 1);
            log::debug!("Nonce range exhausted, retrying with timestamp {}", timestamp);
            header.timestamp = timestamp;
        }
    }
}

/// Mine with the default nonce bound and no cancellation
pub fn mine(
    prev_block_hash: Hash256,
    transactions: Vec<Transaction>,
    target: U256,
) -> Result<MiningResult, MiningError> {
    Miner::default().mine(prev_block_hash, transactions, target)
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    /// The mined block
    pub block: Block,
    /// Number of attempts
    pub attempts: u64,
    /// Time taken
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(GENESIS_TIMESTAMP)
}
