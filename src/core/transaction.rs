// Transaction data structures

use crate::core::{Hash256, PubkeyHash, Script, Serializable, ParseError, sha256};
use crate::core::serialize::{expect_array, field_array, field_i64, field_str, field_u32, field_u64, parse_array};
use serde_json::{json, Value};
use std::fmt;

/// Reference to one output of an earlier transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// What an input draws its value from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A still-unspent output of a prior transaction
    Spend(OutPoint),
    /// Newly minted reward, carrying free-text data
    Coinbase(String),
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VIn {
    pub source: InputSource,
    /// Signature script (scriptSig), empty for coinbase
    pub unlocking_script: Script,
    /// Reserved
    pub sequence: u32,
}

impl VIn {
    pub const DEFAULT_SEQUENCE: u32 = 0xffffffff;

    /// Create an input spending `outpoint`
    pub fn spend(outpoint: OutPoint, unlocking_script: Script) -> Self {
        Self {
            source: InputSource::Spend(outpoint),
            unlocking_script,
            sequence: Self::DEFAULT_SEQUENCE,
        }
    }

    /// Create a coinbase input (for mining rewards)
    pub fn coinbase(data: impl Into<String>) -> Self {
        Self {
            source: InputSource::Coinbase(data.into()),
            unlocking_script: Script::empty(),
            sequence: Self::DEFAULT_SEQUENCE,
        }
    }

    pub fn outpoint(&self) -> Option<&OutPoint> {
        match &self.source {
            InputSource::Spend(outpoint) => Some(outpoint),
            InputSource::Coinbase(_) => None,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.source, InputSource::Coinbase(_))
    }

    /// `[prevTxId, outputIndex, unlockingScript, sequence, coinbaseData]`;
    /// coinbase inputs use an empty id and index -1
    pub(crate) fn to_json(&self) -> Value {
        match &self.source {
            InputSource::Spend(outpoint) => json!([
                outpoint.txid.to_hex(),
                outpoint.index,
                self.unlocking_script.to_string(),
                self.sequence,
                "",
            ]),
            InputSource::Coinbase(data) => json!([
                "",
                -1,
                self.unlocking_script.to_string(),
                self.sequence,
                data,
            ]),
        }
    }

    pub(crate) fn from_json(value: Value) -> Result<Self, ParseError> {
        let fields = expect_array(value, 5)?;
        let prev_txid = field_str(&fields[0], "previous_tx_id")?;
        let index = field_i64(&fields[1], "output_index")?;
        let unlocking_script: Script = field_str(&fields[2], "unlocking_script")?
            .parse()
            .unwrap_or_default();
        let sequence = field_u32(&fields[3], "sequence")?;
        let coinbase_data = field_str(&fields[4], "coinbase_data")?;

        let source = if prev_txid.is_empty() {
            if index != -1 || !unlocking_script.is_empty() {
                return Err(ParseError::Body("coinbase input must use index -1 and no script".to_string()));
            }
            InputSource::Coinbase(coinbase_data.to_string())
        } else {
            if !coinbase_data.is_empty() {
                return Err(ParseError::Body("spending input cannot carry coinbase data".to_string()));
            }
            let index = u32::try_from(index).map_err(|_| ParseError::FieldType("output_index"))?;
            InputSource::Spend(OutPoint::new(Hash256::from_hex(prev_txid)?, index))
        };

        Ok(Self {
            source,
            unlocking_script,
            sequence,
        })
    }
}

/// Transaction output - specifies amount and spending condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VOut {
    index: u32,
    value: u64,
    locking_script: Script,
}

impl VOut {
    pub fn new(index: u32, value: u64, locking_script: Script) -> Self {
        Self {
            index,
            value,
            locking_script,
        }
    }

    /// Output payable to the owner of `pubkey_hash`
    pub fn p2pkh(index: u32, value: u64, pubkey_hash: &PubkeyHash) -> Self {
        Self::new(index, value, Script::p2pkh_locking(pubkey_hash))
    }

    /// Position within the owning transaction
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Amount in the smallest ledger unit
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn locking_script(&self) -> &Script {
        &self.locking_script
    }

    /// Whether this is a standard P2PKH output locked to `pubkey_hash`
    pub fn is_locked_to(&self, pubkey_hash: &PubkeyHash) -> bool {
        self.locking_script.p2pkh_hash().as_ref() == Some(pubkey_hash)
    }

    pub(crate) fn to_json(&self) -> Value {
        json!([self.index, self.value, self.locking_script.to_string()])
    }

    pub(crate) fn from_json(value: Value) -> Result<Self, ParseError> {
        let fields = expect_array(value, 3)?;
        Ok(Self {
            index: field_u32(&fields[0], "index")?,
            value: field_u64(&fields[1], "value")?,
            locking_script: field_str(&fields[2], "locking_script")?
                .parse()
                .unwrap_or_default(),
        })
    }
}

/// The serialization of an output is also the message its owner signs
impl Serializable for VOut {
    fn serialize(&self) -> String {
        self.to_json().to_string()
    }

    fn deserialize(data: &str) -> Result<Self, ParseError> {
        Self::from_json(serde_json::from_str(data)?)
    }
}

/// Transaction. Immutable once built; the id is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    version: u32,
    locktime: u32,
    inputs: Vec<VIn>,
    outputs: Vec<VOut>,
    id: Hash256,
}

impl Transaction {
    /// Build a version 1 transaction with zero locktime
    pub fn build(inputs: Vec<VIn>, outputs: Vec<VOut>) -> Self {
        Self::build_with(1, 0, inputs, outputs)
    }

    pub fn build_with(version: u32, locktime: u32, inputs: Vec<VIn>, outputs: Vec<VOut>) -> Self {
        let id = sha256(Self::id_preimage(version, locktime, &inputs, &outputs).as_bytes());
        Self {
            version,
            locktime,
            inputs,
            outputs,
            id,
        }
    }

    /// Create a coinbase transaction (mining reward)
    pub fn coinbase(pubkey_hash: &PubkeyHash, value: u64, data: impl Into<String>) -> Self {
        Self::build(
            vec![VIn::coinbase(data)],
            vec![VOut::p2pkh(0, value, pubkey_hash)],
        )
    }

    /// Canonical text the id is computed from: every field except the id
    fn id_preimage(version: u32, locktime: u32, inputs: &[VIn], outputs: &[VOut]) -> String {
        let inputs: Vec<Value> = inputs.iter().map(VIn::to_json).collect();
        let outputs: Vec<Value> = outputs.iter().map(VOut::to_json).collect();
        json!([version, locktime, inputs, outputs]).to_string()
    }

    pub fn id(&self) -> Hash256 {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn locktime(&self) -> u32 {
        self.locktime
    }

    pub fn inputs(&self) -> &[VIn] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VOut] {
        &self.outputs
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Sum of output values, `None` on overflow
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Output with the given declared index
    pub fn output(&self, index: u32) -> Option<&VOut> {
        self.outputs.iter().find(|out| out.index == index)
    }

    pub(crate) fn to_json(&self) -> Value {
        let inputs: Vec<Value> = self.inputs.iter().map(VIn::to_json).collect();
        let outputs: Vec<Value> = self.outputs.iter().map(VOut::to_json).collect();
        json!([self.id.to_hex(), self.version, self.locktime, inputs, outputs])
    }

    pub(crate) fn from_json(value: Value) -> Result<Self, ParseError> {
        let mut fields = expect_array(value, 5)?;
        let outputs = field_array(fields.pop().unwrap_or_default(), "outputs")?
            .into_iter()
            .map(VOut::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        let inputs = field_array(fields.pop().unwrap_or_default(), "inputs")?
            .into_iter()
            .map(VIn::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        let claimed = Hash256::from_hex(field_str(&fields[0], "id")?)?;
        let version = field_u32(&fields[1], "version")?;
        let locktime = field_u32(&fields[2], "locktime")?;

        let tx = Self::build_with(version, locktime, inputs, outputs);
        if tx.id != claimed {
            return Err(ParseError::IdMismatch {
                claimed: claimed.to_hex(),
                computed: tx.id.to_hex(),
            });
        }
        Ok(tx)
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> String {
        self.to_json().to_string()
    }

    fn deserialize(data: &str) -> Result<Self, ParseError> {
        Self::from_json(Value::Array(parse_array(data, 5)?))
    }
}
