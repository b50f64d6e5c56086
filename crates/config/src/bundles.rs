use serde::{Deserialize, Serialize};

/// Configuration for bundle delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleConfig {
    /// Wall-clock lifetime of a pending bundle, in seconds.
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,

    /// Timeout for a single post to a baker, in ms.
    #[serde(default = "default_transmit_timeout_ms")]
    pub transmit_timeout_ms: u64,

    /// Path appended to a baker endpoint for bundle ingestion.
    #[serde(default = "default_bundle_path")]
    pub bundle_path: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_expiration_secs(),
            transmit_timeout_ms: default_transmit_timeout_ms(),
            bundle_path: default_bundle_path(),
        }
    }
}

fn default_expiration_secs() -> u64 {
    3_600
}

fn default_transmit_timeout_ms() -> u64 {
    5_000
}

fn default_bundle_path() -> String {
    "/flashbake/bundle".to_owned()
}
