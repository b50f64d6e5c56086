use std::collections::HashSet;

use flashbake_primitives::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the relay needs from a full block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockOperations {
    pub level: u64,
    /// Delegate that produced the block, if the node reported one.
    pub baker: Option<Address>,
    /// Hashes of every operation in every validation pass.
    pub hashes: HashSet<OperationHash>,
}

impl BlockOperations {
    pub fn contains(&self, hash: &OperationHash) -> bool {
        self.hashes.contains(hash)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlock {
    pub(crate) header: RawBlockHeader,
    #[serde(default)]
    pub(crate) metadata: Option<RawBlockMetadata>,
    #[serde(default)]
    pub(crate) operations: Vec<Vec<RawBlockOperation>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlockHeader {
    pub(crate) level: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlockMetadata {
    #[serde(default)]
    pub(crate) baker: Option<Address>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlockOperation {
    pub(crate) hash: OperationHash,
}

impl From<RawBlock> for BlockOperations {
    fn from(raw: RawBlock) -> Self {
        Self {
            level: raw.header.level,
            baker: raw.metadata.and_then(|m| m.baker),
            hashes: raw.operations.into_iter().flatten().map(|op| op.hash).collect(),
        }
    }
}

/// Body of `helpers/parse/operations`.
#[derive(Debug, Serialize)]
pub(crate) struct ParseOperationsRequest<'a> {
    pub(crate) operations: [UnparsedOperation<'a>; 1],
    pub(crate) check_signature: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct UnparsedOperation<'a> {
    pub(crate) data: &'a str,
    pub(crate) branch: &'a BlockHash,
}

/// An operation as decoded by the node.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeParsedOperation {
    #[serde(default)]
    pub contents: Vec<Value>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Response of `helpers/scripts/pack_data`.
#[derive(Debug, Deserialize)]
pub(crate) struct PackedData {
    pub(crate) packed: String,
}

/// Code and storage of a deployed contract.
#[derive(Clone, Debug, Deserialize)]
pub struct ContractScript {
    pub code: Vec<Value>,
    pub storage: Value,
}

impl ContractScript {
    /// Type of the contract storage, from the `storage` section of its code.
    pub fn storage_type(&self) -> Option<&Value> {
        self.code
            .iter()
            .find(|section| section.get("prim").and_then(Value::as_str) == Some("storage"))
            .and_then(|section| section.get("args"))
            .and_then(|args| args.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_operations_flatten_all_passes() {
        let json = r#"{
            "protocol": "PtParisBxoLz5gzMmn3d9WBQNoPSZakgnkMC2VNuQ3KXfUtUQeZ",
            "hash": "BLxyz",
            "header": { "level": 120, "predecessor": "BLabc" },
            "metadata": { "baker": "tz1baker", "level_info": { "level": 120 } },
            "operations": [
                [ { "hash": "ooEndorse", "contents": [] } ],
                [],
                [],
                [ { "hash": "ooManager1" }, { "hash": "ooManager2" } ]
            ]
        }"#;

        let raw: RawBlock = serde_json::from_str(json).unwrap();
        let ops = BlockOperations::from(raw);
        assert_eq!(ops.level, 120);
        assert_eq!(ops.baker, Some(Address::from("tz1baker")));
        assert_eq!(ops.hashes.len(), 3);
        assert!(ops.contains(&"ooManager2".into()));
    }

    #[test]
    fn storage_type_is_found_in_code() {
        let json = r#"{
            "code": [
                { "prim": "parameter", "args": [ { "prim": "unit" } ] },
                { "prim": "storage", "args": [ { "prim": "nat", "annots": ["%counter"] } ] },
                { "prim": "code", "args": [ [] ] }
            ],
            "storage": { "int": "3" }
        }"#;

        let script: ContractScript = serde_json::from_str(json).unwrap();
        assert_eq!(script.storage_type().unwrap()["prim"], "nat");
    }
}
