// Locking/unlocking scripts and the stack machine that evaluates them

use crate::core::{hash160, keys, PubkeyHash, Serializable, Signature, VOut};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opcodes understood by the script VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Duplicate the top stack item
    Dup,
    /// Replace the top item (hex public key) with its HASH160
    Hash160,
    /// Push whether the top two items are equal
    Equal,
    /// Abort unless the top two items are equal
    EqualVerify,
    /// Push whether the signature verifies against the public key
    CheckSig,
    /// Abort unless the signature verifies against the public key
    CheckSigVerify,
    /// Marks trailing data; no effect on the stack
    Return,
}

impl OpCode {
    pub const ALL: [OpCode; 7] = [
        OpCode::Dup,
        OpCode::Hash160,
        OpCode::Equal,
        OpCode::EqualVerify,
        OpCode::CheckSig,
        OpCode::CheckSigVerify,
        OpCode::Return,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Dup => "OP_DUP",
            OpCode::Hash160 => "OP_HASH160",
            OpCode::Equal => "OP_EQUAL",
            OpCode::EqualVerify => "OP_EQUALVERIFY",
            OpCode::CheckSig => "OP_CHECKSIG",
            OpCode::CheckSigVerify => "OP_CHECKSIGVERIFY",
            OpCode::Return => "OP_RETURN",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

/// One script element: an opcode or a literal pushed verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Op(OpCode),
    Data(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Op(op) => f.write_str(op.name()),
            Token::Data(data) => f.write_str(data),
        }
    }
}

/// Ordered token sequence. Text form is the tokens joined by single spaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script(Vec<Token>);

impl Script {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self(tokens)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Pay to public-key hash:
    /// OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
    pub fn p2pkh_locking(pubkey_hash: &PubkeyHash) -> Self {
        Self(vec![
            Token::Op(OpCode::Dup),
            Token::Op(OpCode::Hash160),
            Token::Data(pubkey_hash.to_hex()),
            Token::Op(OpCode::EqualVerify),
            Token::Op(OpCode::CheckSig),
        ])
    }

    /// <signature> <pubkey>
    pub fn p2pkh_unlocking(signature: &Signature, pubkey_hex: &str) -> Self {
        Self(vec![
            Token::Data(signature.to_string()),
            Token::Data(pubkey_hex.to_string()),
        ])
    }

    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The pubkey hash this script locks to, if it is a standard P2PKH script
    pub fn p2pkh_hash(&self) -> Option<PubkeyHash> {
        match self.0.as_slice() {
            [
                Token::Op(OpCode::Dup),
                Token::Op(OpCode::Hash160),
                Token::Data(hash),
                Token::Op(OpCode::EqualVerify),
                Token::Op(OpCode::CheckSig),
            ] => PubkeyHash::from_hex(hash).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

impl FromStr for Script {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = s
            .split_whitespace()
            .map(|word| match OpCode::from_name(word) {
                Some(op) => Token::Op(op),
                None => Token::Data(word.to_string()),
            })
            .collect();
        Ok(Self(tokens))
    }
}

/// A value on the VM stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackItem {
    Bool(bool),
    Data(String),
}

/// Reasons evaluation stops early. All of them collapse to `[false]`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptAbort {
    #[error("stack underflow at {0:?}")]
    StackUnderflow(OpCode),
    #[error("{0:?} failed")]
    VerifyFailed(OpCode),
    #[error("{0:?} expected a data item")]
    ExpectedData(OpCode),
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
}

type Stack = Vec<StackItem>;

/// Evaluate `tokens` against the output being spent.
///
/// Literals are pushed as-is and opcodes act on the top of the stack. Any
/// runtime fault aborts evaluation and the result is exactly `[false]`.
pub fn run_stack(tokens: &[Token], output: &VOut) -> Vec<StackItem> {
    match execute(tokens, output) {
        Ok(stack) => stack,
        Err(abort) => {
            log::debug!("Script aborted: {}", abort);
            vec![StackItem::Bool(false)]
        }
    }
}

/// True only for a final stack of exactly one `true`
pub fn is_success(stack: &[StackItem]) -> bool {
    matches!(stack, [StackItem::Bool(true)])
}

/// Run unlocking tokens followed by locking tokens and report success
pub fn verify_spend(unlocking: &Script, locking: &Script, output: &VOut) -> bool {
    let combined: Vec<Token> = unlocking
        .tokens()
        .iter()
        .chain(locking.tokens())
        .cloned()
        .collect();
    is_success(&run_stack(&combined, output))
}

fn execute(tokens: &[Token], output: &VOut) -> Result<Stack, ScriptAbort> {
    let mut stack = Stack::new();
    for token in tokens {
        match token {
            Token::Data(data) => stack.push(StackItem::Data(data.clone())),
            Token::Op(op) => dispatch(*op)(&mut stack, output)?,
        }
    }
    Ok(stack)
}

type OpHandler = fn(&mut Stack, &VOut) -> Result<(), ScriptAbort>;

fn dispatch(op: OpCode) -> OpHandler {
    match op {
        OpCode::Dup => op_dup,
        OpCode::Hash160 => op_hash160,
        OpCode::Equal => op_equal,
        OpCode::EqualVerify => op_equalverify,
        OpCode::CheckSig => op_checksig,
        OpCode::CheckSigVerify => op_checksigverify,
        OpCode::Return => op_return,
    }
}

fn pop(stack: &mut Stack, op: OpCode) -> Result<StackItem, ScriptAbort> {
    stack.pop().ok_or(ScriptAbort::StackUnderflow(op))
}

fn pop_data(stack: &mut Stack, op: OpCode) -> Result<String, ScriptAbort> {
    match pop(stack, op)? {
        StackItem::Data(data) => Ok(data),
        StackItem::Bool(_) => Err(ScriptAbort::ExpectedData(op)),
    }
}

fn op_dup(stack: &mut Stack, _: &VOut) -> Result<(), ScriptAbort> {
    let top = stack.last().cloned().ok_or(ScriptAbort::StackUnderflow(OpCode::Dup))?;
    stack.push(top);
    Ok(())
}

fn op_hash160(stack: &mut Stack, _: &VOut) -> Result<(), ScriptAbort> {
    let pubkey_hex = pop_data(stack, OpCode::Hash160)?;
    let pubkey = keys::decode_canonical_hex(&pubkey_hex).map_err(|_| ScriptAbort::MalformedPublicKey)?;
    stack.push(StackItem::Data(hash160(&pubkey).to_hex()));
    Ok(())
}

fn op_equal(stack: &mut Stack, _: &VOut) -> Result<(), ScriptAbort> {
    let a = pop(stack, OpCode::Equal)?;
    let b = pop(stack, OpCode::Equal)?;
    stack.push(StackItem::Bool(a == b));
    Ok(())
}

fn op_equalverify(stack: &mut Stack, _: &VOut) -> Result<(), ScriptAbort> {
    let a = pop(stack, OpCode::EqualVerify)?;
    let b = pop(stack, OpCode::EqualVerify)?;
    if a != b {
        return Err(ScriptAbort::VerifyFailed(OpCode::EqualVerify));
    }
    Ok(())
}

/// Pops pubkey then signature; the signed message is the spent output itself.
fn check_signature(stack: &mut Stack, output: &VOut, op: OpCode) -> Result<bool, ScriptAbort> {
    let pubkey_hex = pop_data(stack, op)?;
    let signature = pop_data(stack, op)?;
    signature
        .parse::<Signature>()
        .map_err(|_| ScriptAbort::MalformedSignature)?;
    keys::decompress_public_key(&pubkey_hex).map_err(|_| ScriptAbort::MalformedPublicKey)?;
    Ok(keys::verify(&signature, output.serialize().as_bytes(), &pubkey_hex))
}

fn op_checksig(stack: &mut Stack, output: &VOut) -> Result<(), ScriptAbort> {
    let verified = check_signature(stack, output, OpCode::CheckSig)?;
    stack.push(StackItem::Bool(verified));
    Ok(())
}

fn op_checksigverify(stack: &mut Stack, output: &VOut) -> Result<(), ScriptAbort> {
    if !check_signature(stack, output, OpCode::CheckSigVerify)? {
        return Err(ScriptAbort::VerifyFailed(OpCode::CheckSigVerify));
    }
    Ok(())
}

fn op_return(_: &mut Stack, _: &VOut) -> Result<(), ScriptAbort> {
    Ok(())
}
