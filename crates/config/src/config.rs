use serde::{Deserialize, Serialize};

use crate::{bundles::BundleConfig, scheduling::*};

/// Default value for `port` in [`RelayConfig`].
const DEFAULT_RELAY_PORT: u16 = 10732;

/// Default value for `host` in [`RelayConfig`].
const DEFAULT_RELAY_HOST: &str = "0.0.0.0";

/// Registry contract on mainnet.
const DEFAULT_REGISTRY_CONTRACT: &str = "KT1QuofAgnsWffHzLA7D78rxytJruGHDe7XG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Addr that the relay http server will listen to.
    #[serde(default = "default_relay_host")]
    pub host: String,

    /// Port that the relay http server will listen to.
    #[serde(default = "default_relay_port")]
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
        }
    }
}

fn default_relay_host() -> String {
    DEFAULT_RELAY_HOST.to_owned()
}

fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}

/// Connection to the node RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TezosConfig {
    pub rpc_url: String,

    /// How many times one-shot RPC calls are retried on transient failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u8>,

    /// Sleep between those retries, in ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<u64>,

    /// Interval between attempts to fetch protocol constants at startup, in
    /// ms. Those attempts never give up.
    #[serde(default = "default_constants_retry_ms")]
    pub constants_retry_ms: u64,
}

fn default_constants_retry_ms() -> u64 {
    1_000
}

/// Where baker endpoints are registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_contract")]
    pub contract: String,

    /// Annotation of the big map in the contract storage.
    #[serde(default = "default_big_map_annotation")]
    pub big_map_annotation: String,

    /// Annotation of the endpoint url field in the big map value.
    #[serde(default = "default_endpoint_annotation")]
    pub endpoint_annotation: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            contract: default_registry_contract(),
            big_map_annotation: default_big_map_annotation(),
            endpoint_annotation: default_endpoint_annotation(),
        }
    }
}

fn default_registry_contract() -> String {
    DEFAULT_REGISTRY_CONTRACT.to_owned()
}

fn default_big_map_annotation() -> String {
    "registry".to_owned()
}

fn default_endpoint_annotation() -> String {
    "endpointUrl".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    pub tezos: TezosConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub rights: RightsConfig,
    #[serde(default)]
    pub bundles: BundleConfig,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_load() {
        let config_string = r#"
            [relay]
            host = "127.0.0.1"
            port = 11732

            [tezos]
            rpc_url = "http://localhost:8732"
            retry_count = 3
            retry_interval = 1000

            [registry]
            contract = "KT1QuofAgnsWffHzLA7D78rxytJruGHDe7XG"

            [monitor]
            retry_interval_ms = 5000
            retry_attempts = 1000
            backfill_lookback = 120

            [rights]
            max_round = 1
            fetch_concurrency = 10
            window_source = "cycle"

            [[rights.breakpoints]]
            level = 5726209
            size_before = 16384
            size_after = 24576

            [bundles]
            expiration_secs = 1800
        "#;

        let config = toml::from_str::<Config>(config_string);
        assert!(
            config.is_ok(),
            "should be able to load TOML config but got: {:?}",
            config.err()
        );

        let config = config.unwrap();
        assert_eq!(config.relay.port, 11732);
        assert_eq!(config.monitor.backfill_lookback, 120);
        assert_eq!(config.rights.window_source, WindowSource::Cycle);
        assert_eq!(config.rights.breakpoints.len(), 1);
        assert_eq!(config.bundles.expiration_secs, 1800);
        assert_eq!(config.bundles.bundle_path, "/flashbake/bundle");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = toml::from_str::<Config>(
            r#"
            [tezos]
            rpc_url = "http://localhost:8732"
        "#,
        )
        .unwrap();

        assert_eq!(config.relay.port, DEFAULT_RELAY_PORT);
        assert_eq!(config.registry, RegistryConfig::default());
        assert_eq!(config.tezos.constants_retry_ms, 1_000);
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.rights, RightsConfig::default());
        assert_eq!(config.bundles, BundleConfig::default());
    }
}
