use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::BlockHash;

/// Header fields of a block that the relay tracks.
///
/// Deserializes straight from the node's header JSON, ignoring the fields we
/// don't care about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: BlockHash,
    pub predecessor: BlockHash,
    pub level: u64,
    pub timestamp: DateTime<Utc>,
}

impl BlockRef {
    pub fn new(hash: BlockHash, predecessor: BlockHash, level: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            hash,
            predecessor,
            level,
            timestamp,
        }
    }

    /// Returns if `parent` is the immediate ancestor of this block.
    pub fn extends(&self, parent: &BlockRef) -> bool {
        parent.level + 1 == self.level && parent.hash == self.predecessor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_header_json() {
        let json = r#"{
            "protocol": "PtParisBxoLz5gzMmn3d9WBQNoPSZakgnkMC2VNuQ3KXfUtUQeZ",
            "chain_id": "NetXdQprcVkpaWU",
            "hash": "BLockGenesisGenesisGenesisGenesisGenesisf79b5d1CoW2",
            "level": 5726001,
            "proto": 19,
            "predecessor": "BLockGenesisGenesisGenesisGenesisGenesisGeneskvg68z",
            "timestamp": "2024-08-13T10:20:36Z",
            "validation_pass": 4,
            "operations_hash": "LLoZbUbvTgTDPeRxGzvKHh6RVQL1gD7ty9mEibbAoyf7ugoVpswri",
            "fitness": ["02", "00575f31", "", "ffffffff", "00000000"],
            "context": "CoVmuBqkASLyFxLGQrUyvr1uzuvYP9iXbY6HW1Fz4Ky26DWVyGXt"
        }"#;

        let block: BlockRef = serde_json::from_str(json).unwrap();
        assert_eq!(block.level, 5726001);
        assert_eq!(
            block.predecessor.as_str(),
            "BLockGenesisGenesisGenesisGenesisGenesisGeneskvg68z"
        );
        assert_eq!(block.timestamp.timestamp(), 1723544436);
    }

    #[test]
    fn extends_checks_level_and_hash() {
        let ts = DateTime::<Utc>::UNIX_EPOCH;
        let parent = BlockRef::new("B1".into(), "B0".into(), 1, ts);
        let child = BlockRef::new("B2".into(), "B1".into(), 2, ts);
        let orphan = BlockRef::new("B2'".into(), "B1'".into(), 2, ts);

        assert!(child.extends(&parent));
        assert!(!orphan.extends(&parent));
        assert!(!parent.extends(&child));
    }
}
