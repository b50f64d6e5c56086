//! Base58check hash types and the blake2b digest used to derive them.

use bitcoin::base58;
use blake2::{digest::consts::U32, Blake2b, Digest};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for block hashes (`B...`).
pub const BLOCK_HASH_PREFIX: &[u8] = &[1, 52];

/// Prefix for operation hashes (`o...`).
pub const OPERATION_HASH_PREFIX: &[u8] = &[5, 116];

/// Prefix for script expression hashes (`expr...`).
pub const SCRIPT_EXPR_PREFIX: &[u8] = &[13, 44, 64, 27];

/// Prefix for generic signatures (`sig...`).
pub const GENERIC_SIGNATURE_PREFIX: &[u8] = &[4, 130, 43];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("invalid base58check: {0}")]
    Base58(String),

    #[error("unexpected prefix")]
    Prefix,

    #[error("unexpected payload length {0}")]
    Length(usize),
}

type Blake2b256 = Blake2b<U32>;

/// blake2b with a 32-byte output.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Base58check-encodes `payload` behind `prefix`.
pub fn encode_b58check(prefix: &[u8], payload: &[u8]) -> String {
    let mut buf = Vec::with_capacity(prefix.len() + payload.len());
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(payload);
    base58::encode_check(&buf)
}

/// Decodes a base58check string and strips `prefix`.
pub fn decode_b58check(prefix: &[u8], encoded: &str) -> Result<Vec<u8>, HashError> {
    let raw = base58::decode_check(encoded).map_err(|e| HashError::Base58(e.to_string()))?;
    raw.strip_prefix(prefix)
        .map(<[u8]>::to_vec)
        .ok_or(HashError::Prefix)
}

/// Hash of a block, as reported by the node and used as an operation branch.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(String);
impl_b58_hash!(BlockHash, BLOCK_HASH_PREFIX);

/// Hash of a signed operation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHash(String);
impl_b58_hash!(OperationHash, OPERATION_HASH_PREFIX);

impl OperationHash {
    /// Computes the hash of a forged, signed operation.
    pub fn of_bytes(raw: &[u8]) -> Self {
        Self::from_digest(&blake2b_256(raw))
    }
}

/// Hash of a packed Michelson expression, used as a big map key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptExprHash(String);
impl_b58_hash!(ScriptExprHash, SCRIPT_EXPR_PREFIX);

impl ScriptExprHash {
    /// Computes the key hash of a packed expression.
    pub fn of_packed(packed: &[u8]) -> Self {
        Self::from_digest(&blake2b_256(packed))
    }
}
