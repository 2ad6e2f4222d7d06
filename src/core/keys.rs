// Key pairs, signatures and addresses

use crate::core::{hash160, double_sha256, sha256, PubkeyHash, ParseError};
use rand::rngs::OsRng;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version byte prepended to the pubkey hash before base58 encoding
pub const ADDRESS_VERSION: u8 = 0x00;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
}

/// A secp256k1 key pair with its derived pubkey hash and address
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
    pubkey_hash: PubkeyHash,
    address: String,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self::from_secret_key(SecretKey::new(&mut rng))
    }

    /// Derive the key pair for a given 256-bit private scalar
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey("expected 32 bytes".to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);
        let compressed = public_key.serialize();
        Self {
            secret_key,
            public_key,
            pubkey_hash: hash160(&compressed),
            address: address_of(&compressed),
        }
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Compressed public key (33 bytes, 0x02 for even y, 0x03 for odd y)
    pub fn pubkey_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.pubkey_bytes())
    }

    pub fn pubkey_hash(&self) -> PubkeyHash {
        self.pubkey_hash
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        sign(message, &self.secret_key)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.pubkey_hex())
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// ECDSA signature as a pair of 256-bit integers, text form `hex(r):hex(s)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl Signature {
    fn to_ecdsa(self) -> Option<ecdsa::Signature> {
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        ecdsa::Signature::from_compact(&compact).ok()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.r), hex::encode(self.s))
    }
}

impl FromStr for Signature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (r_hex, s_hex) = s
            .split_once(':')
            .ok_or_else(|| ParseError::Body(format!("signature without separator: {s}")))?;
        Ok(Self {
            r: scalar_from_hex(r_hex)?,
            s: scalar_from_hex(s_hex)?,
        })
    }
}

/// Decode hex spelled exactly as `hex::encode` spells it. Script tokens are
/// hashed verbatim into transaction ids, so each value has one spelling.
pub fn decode_canonical_hex(hex_str: &str) -> Result<Vec<u8>, ParseError> {
    let bytes = hex::decode(hex_str)?;
    if hex::encode(&bytes) != hex_str {
        return Err(ParseError::NonCanonicalHex(hex_str.to_string()));
    }
    Ok(bytes)
}

/// Decode one signature half: exactly 64 lowercase hex digits
fn scalar_from_hex(hex_str: &str) -> Result<[u8; 32], ParseError> {
    let bytes = decode_canonical_hex(hex_str)?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| ParseError::HashLength(bytes.len()))
}

/// Sign SHA256(message) with the given private key
pub fn sign(message: &[u8], secret_key: &SecretKey) -> Signature {
    let secp = Secp256k1::signing_only();
    let digest = Message::from_digest(*sha256(message).as_bytes());
    let compact = secp.sign_ecdsa(&digest, secret_key).serialize_compact();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);
    Signature { r, s }
}

/// Verify a text signature over `message` against a hex compressed public key.
/// Malformed encodings and unrecoverable points yield `false`.
pub fn verify(signature: &str, message: &[u8], public_key_hex: &str) -> bool {
    let Ok(signature) = signature.parse::<Signature>() else {
        return false;
    };
    let Some(signature) = signature.to_ecdsa() else {
        return false;
    };
    let Ok(public_key) = decompress_public_key(public_key_hex) else {
        return false;
    };

    let secp = Secp256k1::verification_only();
    let digest = Message::from_digest(*sha256(message).as_bytes());
    secp.verify_ecdsa(&digest, &signature, &public_key).is_ok()
}

/// Recover the curve point from its 33-byte compressed hex encoding
pub fn decompress_public_key(public_key_hex: &str) -> Result<PublicKey, ParseError> {
    let bytes = decode_canonical_hex(public_key_hex)?;
    if bytes.len() != 33 {
        return Err(ParseError::PublicKey(format!("expected 33 bytes, got {}", bytes.len())));
    }
    PublicKey::from_slice(&bytes).map_err(|e| ParseError::PublicKey(e.to_string()))
}

/// Base58 address: version byte, hash160 of the compressed key, 4-byte checksum
pub fn address_of(public_key_compressed: &[u8]) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(&hash160(public_key_compressed).0);
    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum.as_bytes()[..4]);
    bs58::encode(payload).into_string()
}
