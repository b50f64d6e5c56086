//! Decoding and admission checks for signed operations.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use flashbake_primitives::{
    hash::{encode_b58check, GENERIC_SIGNATURE_PREFIX},
    prelude::*,
};
use serde_json::Value;
use thiserror::Error;
use tracing::*;

use crate::rpc::{error::ClientError, TezosClient};

/// Size of the branch block hash at the head of a forged operation.
const BRANCH_LEN: usize = 32;

/// Size of the signature at the tail of a signed operation.
const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("operation is not hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("operation too short ({0} bytes)")]
    TooShort(usize),

    #[error("node could not parse operation: {0}")]
    Rejected(#[source] ClientError),
}

/// Reasons an operation is refused before it is relayed.
#[derive(Debug, Error)]
pub enum PrecheckError {
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("source {0} has not revealed its key")]
    UnrevealedSource(Address),

    #[error("branch {0} is outside the live window")]
    Expired(BlockHash),

    #[error("could not check operation: {0}")]
    Client(#[from] ClientError),
}

/// A signed operation split into the parts the relay reasons about.
#[derive(Clone, Debug)]
pub struct ParsedOperation {
    pub hash: OperationHash,
    pub branch: BlockHash,
    pub contents: Vec<Value>,
    pub signature: String,
    raw_hex: String,
}

impl ParsedOperation {
    /// Kinds of the contents, in order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.contents
            .iter()
            .filter_map(|c| c.get("kind").and_then(Value::as_str))
    }

    /// Distinct sources of the manager operations in the contents.
    pub fn sources(&self) -> BTreeSet<Address> {
        self.contents
            .iter()
            .filter_map(|c| c.get("source").and_then(Value::as_str))
            .map(Address::from)
            .collect()
    }

    pub fn has_reveal(&self) -> bool {
        self.kinds().any(|k| k == "reveal")
    }
}

/// The parts of a raw operation that don't need the node to read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub hash: OperationHash,
    pub branch: BlockHash,
    pub signature: String,
    /// Hex of everything after the branch, as the node's parser expects it.
    pub body_hex: String,
}

impl Envelope {
    pub fn decode(raw_hex: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(raw_hex.trim())?;
        if bytes.len() < BRANCH_LEN + SIGNATURE_LEN {
            return Err(CodecError::TooShort(bytes.len()));
        }

        let (branch, body) = bytes.split_at(BRANCH_LEN);
        let sig = &bytes[bytes.len() - SIGNATURE_LEN..];
        let branch: &[u8; 32] = branch
            .try_into()
            .map_err(|_| CodecError::TooShort(bytes.len()))?;

        Ok(Self {
            hash: OperationHash::of_bytes(&bytes),
            branch: BlockHash::from_digest(branch),
            signature: encode_b58check(GENERIC_SIGNATURE_PREFIX, sig),
            body_hex: hex::encode(body),
        })
    }
}

/// Parses, checks and hashes signed operations.
#[async_trait]
pub trait OperationCodec: Sync + Send + 'static {
    async fn parse(&self, raw_hex: &str) -> Result<ParsedOperation, CodecError>;

    /// Checks an operation can still be included and is properly signed.
    async fn precheck(
        &self,
        op: &ParsedOperation,
        active_branches: &HashSet<BlockHash>,
    ) -> Result<(), PrecheckError>;

    /// Encoding sent to bakers.
    fn to_wire_hex(&self, op: &ParsedOperation) -> String {
        op.raw_hex.clone()
    }

    fn hash(&self, raw_hex: &str) -> Result<OperationHash, CodecError> {
        Envelope::decode(raw_hex).map(|e| e.hash)
    }
}

impl ParsedOperation {
    /// Builds a parsed operation from already-decoded parts.
    pub fn new(envelope: Envelope, contents: Vec<Value>, raw_hex: impl Into<String>) -> Self {
        Self {
            hash: envelope.hash,
            branch: envelope.branch,
            contents,
            signature: envelope.signature,
            raw_hex: raw_hex.into(),
        }
    }

    pub fn raw_hex(&self) -> &str {
        &self.raw_hex
    }
}

/// [`OperationCodec`] that defers content decoding and signature checks to
/// the node.
#[derive(Debug, Clone)]
pub struct RpcOperationCodec {
    client: Arc<TezosClient>,
}

impl RpcOperationCodec {
    pub fn new(client: Arc<TezosClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OperationCodec for RpcOperationCodec {
    async fn parse(&self, raw_hex: &str) -> Result<ParsedOperation, CodecError> {
        let envelope = Envelope::decode(raw_hex)?;
        let parsed = self
            .client
            .parse_operation(&envelope.branch, &envelope.body_hex, false)
            .await
            .map_err(CodecError::Rejected)?;

        Ok(ParsedOperation::new(
            envelope,
            parsed.contents,
            raw_hex.trim().to_lowercase(),
        ))
    }

    async fn precheck(
        &self,
        op: &ParsedOperation,
        active_branches: &HashSet<BlockHash>,
    ) -> Result<(), PrecheckError> {
        if !active_branches.contains(&op.branch) {
            return Err(PrecheckError::Expired(op.branch.clone()));
        }

        let mut any_revealed = false;
        for source in op.sources() {
            match self.client.get_manager_key(&source).await? {
                Some(_) => any_revealed = true,
                // The reveal in this operation will install the key.
                None if op.has_reveal() => {}
                None => return Err(PrecheckError::UnrevealedSource(source)),
            }
        }

        // Without a key on chain the node has nothing to check against.
        if !any_revealed {
            debug!(hash = %op.hash, "skipping signature check for revealing operation");
            return Ok(());
        }

        let body_hex = &op.raw_hex[BRANCH_LEN * 2..];
        match self.client.parse_operation(&op.branch, body_hex, true).await {
            Ok(_) => Ok(()),
            Err(ClientError::Status(_, reason)) => Err(PrecheckError::SignatureInvalid(reason)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw_op(body_len: usize) -> String {
        let mut bytes = vec![0xaa; BRANCH_LEN];
        bytes.extend(std::iter::repeat(0x6c).take(body_len));
        bytes.extend(std::iter::repeat(0x55).take(SIGNATURE_LEN));
        hex::encode(bytes)
    }

    #[test]
    fn envelope_splits_branch_and_signature() {
        let raw = raw_op(40);
        let env = Envelope::decode(&raw).unwrap();

        assert_eq!(env.branch, BlockHash::from_digest(&[0xaa; 32]));
        assert!(env.signature.starts_with("sig"), "{}", env.signature);
        assert_eq!(env.body_hex.len(), (40 + SIGNATURE_LEN) * 2);
        assert_eq!(env.hash, OperationHash::of_bytes(&hex::decode(&raw).unwrap()));
    }

    #[test]
    fn envelope_rejects_short_and_non_hex() {
        assert!(matches!(
            Envelope::decode(&hex::encode([0u8; 90])),
            Err(CodecError::TooShort(90))
        ));
        assert!(matches!(Envelope::decode("zz"), Err(CodecError::Hex(_))));
    }

    #[test]
    fn sources_are_deduplicated() {
        let env = Envelope::decode(&raw_op(10)).unwrap();
        let op = ParsedOperation::new(
            env,
            vec![
                json!({ "kind": "reveal", "source": "tz1A" }),
                json!({ "kind": "transaction", "source": "tz1A" }),
                json!({ "kind": "transaction", "source": "tz1B" }),
            ],
            raw_op(10),
        );

        let sources: Vec<_> = op.sources().into_iter().collect();
        assert_eq!(sources, vec![Address::from("tz1A"), Address::from("tz1B")]);
        assert!(op.has_reveal());
    }
}
