use std::{fmt, time::Duration};

use async_trait::async_trait;
use flashbake_primitives::prelude::*;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::*;

use super::{
    error::ClientError,
    stream::{decode_heads, HeadStream},
    traits::ChainRpc,
    types::*,
};

/// This is an alias for the result type returned by the [`TezosClient`].
pub type ClientResult<T> = Result<T, ClientError>;

/// The default number of retries for a request.
const DEFAULT_MAX_RETRIES: u8 = 3;

/// The default sleep between retries, in ms.
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_000;

/// An `async` client for the Tezos node RPC.
#[derive(Debug, Clone)]
pub struct TezosClient {
    /// Base URL of the node RPC, without trailing slash.
    url: String,
    /// The underlying `async` HTTP client.
    client: Client,
    max_retries: u8,
    retry_interval: Duration,
}

impl TezosClient {
    /// Creates a new [`TezosClient`] for the node at `url`.
    pub fn new(url: impl Into<String>) -> ClientResult<Self> {
        let url = url.into().trim_end_matches('/').to_owned();
        if url.is_empty() {
            return Err(ClientError::Param("empty node url".to_owned()));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| ClientError::Other(format!("Could not create client: {e}")))?;

        trace!(%url, "Created tezos client");

        Ok(Self {
            url,
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        })
    }

    /// Overrides the retry policy for one-shot requests.
    pub fn with_retries(mut self, max_retries: Option<u8>, interval_ms: Option<u64>) -> Self {
        if let Some(max) = max_retries {
            self.max_retries = max.max(1);
        }
        if let Some(ms) = interval_ms {
            self.retry_interval = Duration::from_millis(ms);
        }
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    /// Sends a request built by `build`, retrying transport failures and 5xx
    /// answers.
    async fn call<T: DeserializeOwned + fmt::Debug>(
        &self,
        path: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> ClientResult<T> {
        let mut retries = 0;
        loop {
            trace!(%path, %retries, "Calling tezos node");

            let err = match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<T>()
                            .await
                            .map_err(|e| ClientError::Parse(e.to_string()));
                    }

                    let body = resp.text().await.unwrap_or_default();
                    if status == StatusCode::NOT_FOUND {
                        return Err(ClientError::NotFound(path.to_owned()));
                    }
                    if !status.is_server_error() {
                        return Err(ClientError::Status(status.as_u16(), body));
                    }

                    let e = ClientError::Status(status.as_u16(), body);
                    warn!(%e, %path, "node error, retrying...");
                    e
                }
                Err(err) => {
                    let e = ClientError::from(err);
                    if !e.is_transient() {
                        return Err(e);
                    }
                    warn!(%e, %path, "transport error, retrying...");
                    e
                }
            };

            retries += 1;
            if retries >= self.max_retries {
                debug!(%err, %path, "giving up");
                return Err(ClientError::MaxRetriesExceeded(self.max_retries));
            }
            sleep(self.retry_interval).await;
        }
    }

    async fn get<T: DeserializeOwned + fmt::Debug>(&self, path: &str) -> ClientResult<T> {
        let url = self.endpoint(path);
        self.call(path, || self.client.get(&url)).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + fmt::Debug,
    {
        let url = self.endpoint(path);
        let body = serde_json::to_value(body).map_err(|e| ClientError::Param(e.to_string()))?;
        self.call(path, || self.client.post(&url).json(&body)).await
    }

    /// Public key revealed for `source`, or `None` if it never revealed.
    pub async fn get_manager_key(&self, source: &Address) -> ClientResult<Option<String>> {
        self.get(&format!(
            "/chains/main/blocks/head/context/contracts/{source}/manager_key"
        ))
        .await
    }

    /// Has the node decode an operation. With `check_signature` the node
    /// also verifies it against the manager keys on chain.
    pub async fn parse_operation(
        &self,
        branch: &BlockHash,
        data_hex: &str,
        check_signature: bool,
    ) -> ClientResult<NodeParsedOperation> {
        let req = ParseOperationsRequest {
            operations: [UnparsedOperation {
                data: data_hex,
                branch,
            }],
            check_signature,
        };

        let mut parsed: Vec<NodeParsedOperation> = self
            .post("/chains/main/blocks/head/helpers/parse/operations", &req)
            .await?;
        if parsed.is_empty() {
            return Err(ClientError::MalformedResponse(
                "node parsed no operation".to_owned(),
            ));
        }
        Ok(parsed.swap_remove(0))
    }

    /// Packs a Michelson value, returning the packed bytes.
    pub async fn pack_data(&self, data: &Value, ty: &Value) -> ClientResult<Vec<u8>> {
        let packed: PackedData = self
            .post(
                "/chains/main/blocks/head/helpers/scripts/pack_data",
                &json!({ "data": data, "type": ty }),
            )
            .await?;
        hex::decode(&packed.packed).map_err(|e| ClientError::MalformedResponse(e.to_string()))
    }

    pub async fn get_contract_script(&self, contract: &str) -> ClientResult<ContractScript> {
        self.get(&format!(
            "/chains/main/blocks/head/context/contracts/{contract}/script"
        ))
        .await
    }

    /// Value stored under `key` in big map `id`, or `None` if absent.
    pub async fn get_big_map_value(
        &self,
        id: &str,
        key: &ScriptExprHash,
    ) -> ClientResult<Option<Value>> {
        match self
            .get(&format!("/chains/main/blocks/head/context/big_maps/{id}/{key}"))
            .await
        {
            Ok(v) => Ok(Some(v)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChainRpc for TezosClient {
    async fn head_stream(&self) -> ClientResult<HeadStream> {
        let resp = self
            .client
            .get(self.endpoint("/monitor/heads/main"))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status(status.as_u16(), body));
        }

        debug!("opened head stream");
        Ok(decode_heads(resp.bytes_stream()))
    }

    async fn get_header(&self, level: u64) -> ClientResult<BlockRef> {
        self.get(&format!("/chains/main/blocks/{level}/header")).await
    }

    async fn get_block_operations(&self, block: &BlockHash) -> ClientResult<BlockOperations> {
        let raw: RawBlock = self.get(&format!("/chains/main/blocks/{block}")).await?;
        Ok(raw.into())
    }

    async fn get_baking_rights(&self, level: u64, max_round: u32) -> ClientResult<Vec<Assignment>> {
        self.get(&format!(
            "/chains/main/blocks/head/helpers/baking_rights?level={level}&max_round={max_round}"
        ))
        .await
    }

    async fn get_constants(&self) -> ClientResult<ChainConstants> {
        self.get("/chains/main/blocks/head/context/constants").await
    }
}
