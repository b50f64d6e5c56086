use serde::{Deserialize, Serialize};

/// Body posted to a baker's bundle ingestion endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    /// Signed operations, hex-encoded, in inclusion order.
    pub transactions: Vec<String>,

    /// Whether the baker should put the bundle first in the block or not at
    /// all.
    pub first_or_discard: bool,
}
