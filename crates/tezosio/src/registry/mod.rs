//! Resolution of baker addresses to their bundle endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use flashbake_primitives::prelude::*;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::*;

use crate::rpc::{error::ClientError, TezosClient};

mod michelson;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry query failed: {0}")]
    Client(#[from] ClientError),

    #[error("no field annotated %{0} in registry")]
    MissingAnnotation(String),

    #[error("malformed registry entry: {0}")]
    Malformed(String),
}

/// Looks up where a baker accepts bundles.
#[cfg_attr(feature = "test_utils", mockall::automock)]
#[async_trait]
pub trait RegistryLookup: Sync + Send + 'static {
    /// Returns the endpoint registered for `delegate`, if any.
    async fn lookup_endpoint(&self, delegate: &Address) -> Result<Option<String>, RegistryError>;
}

/// Location and shape of the registry big map.
#[derive(Clone, Debug)]
struct BigMapInfo {
    id: String,
    key_type: Value,
    value_type: Value,
}

/// Registry kept in a contract's storage as a big map from baker key hash to
/// a record holding the endpoint url.
#[derive(Debug)]
pub struct OnChainRegistry {
    client: Arc<TezosClient>,
    contract: String,
    big_map_annotation: String,
    endpoint_annotation: String,
    big_map: OnceCell<BigMapInfo>,
}

impl OnChainRegistry {
    pub fn new(
        client: Arc<TezosClient>,
        contract: impl Into<String>,
        big_map_annotation: impl Into<String>,
        endpoint_annotation: impl Into<String>,
    ) -> Self {
        Self {
            client,
            contract: contract.into(),
            big_map_annotation: big_map_annotation.into(),
            endpoint_annotation: endpoint_annotation.into(),
            big_map: OnceCell::new(),
        }
    }

    async fn big_map(&self) -> Result<&BigMapInfo, RegistryError> {
        self.big_map
            .get_or_try_init(|| async {
                let script = self.client.get_contract_script(&self.contract).await?;
                let storage_type = script
                    .storage_type()
                    .ok_or_else(|| RegistryError::Malformed("contract has no storage".into()))?;

                let (ty, val) = michelson::find_annotated(
                    storage_type,
                    &script.storage,
                    &self.big_map_annotation,
                )
                .ok_or_else(|| RegistryError::MissingAnnotation(self.big_map_annotation.clone()))?;

                let id = val
                    .get("int")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RegistryError::Malformed(format!("big map id {val}")))?;
                let (key_type, value_type) = match ty.get("args").and_then(Value::as_array) {
                    Some(args) if args.len() == 2 => (args[0].clone(), args[1].clone()),
                    _ => return Err(RegistryError::Malformed(format!("big map type {ty}"))),
                };

                info!(contract = %self.contract, %id, "resolved registry big map");
                Ok(BigMapInfo {
                    id: id.to_owned(),
                    key_type,
                    value_type,
                })
            })
            .await
    }
}

#[async_trait]
impl RegistryLookup for OnChainRegistry {
    async fn lookup_endpoint(&self, delegate: &Address) -> Result<Option<String>, RegistryError> {
        let big_map = self.big_map().await?;

        let packed = self
            .client
            .pack_data(&json!({ "string": delegate.as_str() }), &big_map.key_type)
            .await?;
        let key = ScriptExprHash::of_packed(&packed);

        let Some(entry) = self.client.get_big_map_value(&big_map.id, &key).await? else {
            trace!(%delegate, "not registered");
            return Ok(None);
        };

        let (_, field) =
            michelson::find_annotated(&big_map.value_type, &entry, &self.endpoint_annotation)
                .ok_or_else(|| RegistryError::MissingAnnotation(self.endpoint_annotation.clone()))?;
        let endpoint = michelson::as_text(field)
            .ok_or_else(|| RegistryError::Malformed(format!("endpoint {field}")))?;

        debug!(%delegate, %endpoint, "found registered endpoint");
        Ok(Some(endpoint))
    }
}
