//! Delivery of bundles to baker endpoints.

use std::time::Duration;

use async_trait::async_trait;
use flashbake_primitives::bundle::BundleRequest;
use reqwest::Client;
use thiserror::Error;
use tracing::*;

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("baker answered {0}: {1}")]
    Status(u16, String),

    #[error("could not reach baker: {0}")]
    Connection(String),

    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransmitError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() {
            Self::Connection(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Sends bundles to bakers.
#[async_trait]
pub trait BundleTransport: Sync + Send + 'static {
    async fn send_bundle(&self, endpoint: &str, bundle: &BundleRequest)
        -> Result<(), TransmitError>;
}

/// [`BundleTransport`] posting JSON to the baker's ingestion path.
#[derive(Debug, Clone)]
pub struct HttpBundleTransport {
    client: Client,
    bundle_path: String,
}

impl HttpBundleTransport {
    pub fn new(bundle_path: impl Into<String>, timeout: Duration) -> Result<Self, TransmitError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransmitError::Other(format!("could not create client: {e}")))?;

        Ok(Self {
            client,
            bundle_path: bundle_path.into(),
        })
    }

    fn bundle_url(&self, endpoint: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), self.bundle_path)
    }
}

#[async_trait]
impl BundleTransport for HttpBundleTransport {
    async fn send_bundle(
        &self,
        endpoint: &str,
        bundle: &BundleRequest,
    ) -> Result<(), TransmitError> {
        let url = self.bundle_url(endpoint);
        trace!(%url, txs = bundle.transactions.len(), "posting bundle");

        let resp = self.client.post(&url).json(bundle).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransmitError::Status(status.as_u16(), body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_endpoint_and_path() {
        let t = HttpBundleTransport::new("/flashbake/bundle", Duration::from_secs(1)).unwrap();
        assert_eq!(
            t.bundle_url("http://baker.example:11732/"),
            "http://baker.example:11732/flashbake/bundle"
        );
    }

    #[tokio::test]
    async fn unreachable_baker_is_an_error() {
        let t = HttpBundleTransport::new("/flashbake/bundle", Duration::from_millis(500)).unwrap();
        let bundle = BundleRequest {
            transactions: vec!["00".to_owned()],
            first_or_discard: false,
        };

        let err = t.send_bundle("http://127.0.0.1:1", &bundle).await.unwrap_err();
        assert!(matches!(err, TransmitError::Connection(_) | TransmitError::Timeout));
    }
}
