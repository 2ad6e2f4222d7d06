// Block data structures

use crate::core::{sha256, Hash256, KeyPair, ParseError, Serializable, Transaction, U256};
use crate::core::serialize::{expect_array, field_array, field_str, field_u32, field_u64, parse_array};
use serde_json::{json, Value};
use thiserror::Error;

/// Text carried by the genesis coinbase input
pub const GENESIS_MESSAGE: &str = "Learning bitcoin";

/// Private scalar owning the genesis output. Public so a wallet can be
/// seeded with the initial funds.
pub const GENESIS_SECRET: &str = "1e99423a4ed27608a15a2616a2b0e9e52ced330ac530edcc32c8ffc6a526aedd";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("merkle root requested for an empty transaction list")]
pub struct EmptyMerkleTree;

/// Merkle commitment over transaction ids.
///
/// A single leaf is its own root. On every level with an odd number of
/// nodes the last node is paired with itself; a parent is SHA256 of the
/// raw 32-byte left child followed by the right child.
pub fn merkle_root(ids: &[Hash256]) -> Result<Hash256, EmptyMerkleTree> {
    if ids.is_empty() {
        return Err(EmptyMerkleTree);
    }

    let mut level = ids.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1]);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(pair[0].as_bytes());
                combined[32..].copy_from_slice(pair[1].as_bytes());
                sha256(&combined)
            })
            .collect();
    }
    Ok(level[0])
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Hash of the previous block
    pub prev_block_hash: Hash256,
    /// Merkle root of all transactions in the block
    pub merkle_root: Hash256,
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
    /// Proof-of-work hash must be strictly below this value
    pub target: U256,
    /// Nonce for proof-of-work
    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_block_hash: Hash256,
        merkle_root: Hash256,
        timestamp: u64,
        target: U256,
        nonce: u64,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            target,
            nonce,
        }
    }

    /// Stable text of every header field except the nonce
    pub fn serialize_without_nonce(&self) -> String {
        json!([
            self.version,
            self.prev_block_hash.to_hex(),
            self.merkle_root.to_hex(),
            self.timestamp,
            self.target.to_string(),
        ])
        .to_string()
    }

    /// Hash of `header-without-nonce || decimal nonce`
    pub fn pow_hash(&self) -> Hash256 {
        pow_hash_with(&self.serialize_without_nonce(), self.nonce)
    }

    /// Whether the proof-of-work hash, read as an integer, is below the target
    pub fn meets_target(&self) -> bool {
        self.pow_hash().to_u256() < self.target
    }

    fn to_json(&self) -> Value {
        json!([
            self.version,
            self.prev_block_hash.to_hex(),
            self.merkle_root.to_hex(),
            self.timestamp,
            self.target.to_string(),
            self.nonce,
        ])
    }

    fn from_json(value: Value) -> Result<Self, ParseError> {
        let fields = expect_array(value, 6)?;
        let target_text = field_str(&fields[4], "target")?;
        let target = U256::from_dec_str(target_text)
            .map_err(|_| ParseError::Target(target_text.to_string()))?;
        Ok(Self {
            version: field_u32(&fields[0], "version")?,
            prev_block_hash: Hash256::from_hex(field_str(&fields[1], "prev_block_hash")?)?,
            merkle_root: Hash256::from_hex(field_str(&fields[2], "merkle_root")?)?,
            timestamp: field_u64(&fields[3], "timestamp")?,
            target,
            nonce: field_u64(&fields[5], "nonce")?,
        })
    }
}

/// Proof-of-work digest for a candidate nonce over a pre-serialized header
pub fn pow_hash_with(header_without_nonce: &str, nonce: u64) -> Hash256 {
    sha256(format!("{header_without_nonce}{nonce}").as_bytes())
}

/// Block - header plus its transactions. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    header: BlockHeader,
    transaction_count: usize,
    transactions: Vec<Transaction>,
    size: usize,
    hash: Hash256,
}

impl Block {
    /// Assemble a block, fixing its count, size and hash
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        let transaction_count = transactions.len();
        let size = Self::body_json(&header, transaction_count, &transactions)
            .to_string()
            .len();
        Self::assemble(header, transaction_count, transactions, size)
    }

    fn assemble(
        header: BlockHeader,
        transaction_count: usize,
        transactions: Vec<Transaction>,
        size: usize,
    ) -> Self {
        let mut block = Self {
            header,
            transaction_count,
            transactions,
            size,
            hash: Hash256::zero(),
        };
        block.hash = sha256(block.serialize().as_bytes());
        block
    }

    /// The block every node starts from: a single coinbase paying the
    /// base reward to the genesis key
    pub fn genesis() -> Self {
        use crate::consensus::{initial_target, BASE_REWARD, GENESIS_TIMESTAMP};

        let owner = KeyPair::from_secret_hex(GENESIS_SECRET).expect("valid scalar");
        let coinbase = Transaction::coinbase(&owner.pubkey_hash(), BASE_REWARD, GENESIS_MESSAGE);
        let header = BlockHeader::new(
            1,
            Hash256::zero(),
            coinbase.id(),
            GENESIS_TIMESTAMP,
            initial_target(),
            0,
        );
        Self::new(header, vec![coinbase])
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Count as declared in the block, which validation compares to the list
    pub fn transaction_count(&self) -> usize {
        self.transaction_count
    }

    /// Declared byte length of the serialized block without the size field
    pub fn size(&self) -> usize {
        self.size
    }

    /// SHA256 of the full serialized block
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.prev_block_hash == Hash256::zero()
    }

    /// Merkle root recomputed from the contained transactions
    pub fn compute_merkle_root(&self) -> Result<Hash256, EmptyMerkleTree> {
        let ids: Vec<Hash256> = self.transactions.iter().map(Transaction::id).collect();
        merkle_root(&ids)
    }

    /// Byte length the size field should hold for this header and list
    pub fn computed_size(&self) -> usize {
        Self::body_json(&self.header, self.transaction_count, &self.transactions)
            .to_string()
            .len()
    }

    fn body_json(header: &BlockHeader, count: usize, transactions: &[Transaction]) -> Value {
        let txs: Vec<Value> = transactions.iter().map(Transaction::to_json).collect();
        json!([header.to_json(), count, txs])
    }
}

impl Serializable for Block {
    fn serialize(&self) -> String {
        let txs: Vec<Value> = self.transactions.iter().map(Transaction::to_json).collect();
        json!([self.header.to_json(), self.transaction_count, txs, self.size]).to_string()
    }

    fn deserialize(data: &str) -> Result<Self, ParseError> {
        let mut fields = parse_array(data, 4)?;
        let size = field_u64(&fields[3], "size")? as usize;
        let transaction_count = field_u64(&fields[1], "transaction_count")? as usize;
        let transactions = field_array(fields.remove(2), "transactions")?
            .into_iter()
            .map(Transaction::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        let header = BlockHeader::from_json(fields.remove(0))?;
        Ok(Self::assemble(header, transaction_count, transactions, size))
    }
}
