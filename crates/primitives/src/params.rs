//! Protocol constants the relay schedules against.

use serde::{Deserialize, Deserializer, Serialize};

/// Subset of `/chains/main/blocks/head/context/constants`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConstants {
    /// Number of blocks an operation's branch stays valid for.
    pub max_operations_time_to_live: u64,

    pub blocks_per_cycle: u64,

    /// Minimal block interval in seconds. The node encodes this as a string.
    #[serde(deserialize_with = "de_stringified_u64")]
    pub minimal_block_delay: u64,
}

impl ChainConstants {
    /// Looks a constant up by its node-side name.
    pub fn get(&self, name: &str) -> Option<u64> {
        match name {
            "max_operations_time_to_live" => Some(self.max_operations_time_to_live),
            "blocks_per_cycle" => Some(self.blocks_per_cycle),
            "minimal_block_delay" => Some(self.minimal_block_delay),
            _ => None,
        }
    }
}

fn de_stringified_u64<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(de)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
