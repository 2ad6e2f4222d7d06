// Serialization utilities for ledger data structures
//
// Every entity is encoded as a compact JSON array with a fixed field order.
// Decoding is strict: wrong arity or a field of the wrong type is an error.

use serde_json::Value;
use thiserror::Error;

/// Malformed wire message or serialized entity
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("hex must be lowercase with an even number of digits: `{0}`")]
    NonCanonicalHex(String),
    #[error("invalid hash length: {0} bytes")]
    HashLength(usize),
    #[error("expected array of {expected} elements, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("field `{0}` has the wrong type")]
    FieldType(&'static str),
    #[error("invalid difficulty target: {0}")]
    Target(String),
    #[error("invalid public key: {0}")]
    PublicKey(String),
    #[error("transaction id mismatch: claimed {claimed}, computed {computed}")]
    IdMismatch { claimed: String, computed: String },
    #[error("malformed message envelope: {0}")]
    Envelope(String),
    #[error("unknown message type `{0}`")]
    UnknownMessage(String),
    #[error("malformed message body: {0}")]
    Body(String),
    #[error("malformed frame: {0}")]
    Frame(String),
}

/// Trait for types with a canonical, round-trip exact text encoding
pub trait Serializable {
    fn serialize(&self) -> String;
    fn deserialize(data: &str) -> Result<Self, ParseError> where Self: Sized;
}

/// Parse `data` as a JSON array with exactly `arity` elements
pub fn parse_array(data: &str, arity: usize) -> Result<Vec<Value>, ParseError> {
    let value: Value = serde_json::from_str(data)?;
    expect_array(value, arity)
}

pub fn expect_array(value: Value, arity: usize) -> Result<Vec<Value>, ParseError> {
    match value {
        Value::Array(items) if items.len() == arity => Ok(items),
        Value::Array(items) => Err(ParseError::Arity { expected: arity, got: items.len() }),
        _ => Err(ParseError::Arity { expected: arity, got: 0 }),
    }
}

pub fn field_u64(value: &Value, name: &'static str) -> Result<u64, ParseError> {
    value.as_u64().ok_or(ParseError::FieldType(name))
}

pub fn field_u32(value: &Value, name: &'static str) -> Result<u32, ParseError> {
    field_u64(value, name)?
        .try_into()
        .map_err(|_| ParseError::FieldType(name))
}

pub fn field_i64(value: &Value, name: &'static str) -> Result<i64, ParseError> {
    value.as_i64().ok_or(ParseError::FieldType(name))
}

pub fn field_str<'a>(value: &'a Value, name: &'static str) -> Result<&'a str, ParseError> {
    value.as_str().ok_or(ParseError::FieldType(name))
}

pub fn field_array(value: Value, name: &'static str) -> Result<Vec<Value>, ParseError> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(ParseError::FieldType(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_array_arity() {
        assert_eq!(parse_array("[1,2,3]", 3).unwrap().len(), 3);
        assert!(matches!(
            parse_array("[1,2]", 3),
            Err(ParseError::Arity { expected: 3, got: 2 })
        ));
        assert!(matches!(parse_array("{\"a\":1}", 1), Err(ParseError::Arity { .. })));
        assert!(matches!(parse_array("not json", 1), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_field_accessors() {
        assert_eq!(field_u64(&json!(7), "n").unwrap(), 7);
        assert_eq!(field_i64(&json!(-1), "n").unwrap(), -1);
        assert!(field_u64(&json!(-1), "n").is_err());
        assert!(field_u32(&json!(u64::MAX), "n").is_err());
        assert_eq!(field_str(&json!("x"), "s").unwrap(), "x");
        assert!(field_str(&json!(1), "s").is_err());
        assert!(field_array(json!("x"), "a").is_err());
    }
}
