use std::{sync::Arc, time::Duration};

use flashbake_common::retry::{policies::FixedInterval, retry_with_backoff};
use flashbake_primitives::params::ChainConstants;
use flashbake_tezosio::rpc::{error::ClientError, traits::ChainRpc};
use tokio::sync::OnceCell;

/// Protocol constants, fetched from the node on first use and kept for the
/// life of the relay.
pub struct ConstantsCell {
    client: Arc<dyn ChainRpc>,
    retry_interval: Duration,
    cell: OnceCell<ChainConstants>,
}

impl ConstantsCell {
    pub fn new(client: Arc<dyn ChainRpc>, retry_interval: Duration) -> Self {
        Self {
            client,
            retry_interval,
            cell: OnceCell::new(),
        }
    }

    /// Returns the constants, waiting for the node as long as it takes.
    pub async fn get(&self) -> Result<ChainConstants, ClientError> {
        let backoff = FixedInterval::new(self.retry_interval.as_millis() as u64);
        self.cell
            .get_or_try_init(|| {
                retry_with_backoff("fetch chain constants", None, &backoff, || {
                    self.client.get_constants()
                })
            })
            .await
            .copied()
    }

    /// Returns the constants if they were already fetched.
    pub fn try_get(&self) -> Option<ChainConstants> {
        self.cell.get().copied()
    }
}

impl std::fmt::Debug for ConstantsCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantsCell")
            .field("retry_interval", &self.retry_interval)
            .field("cell", &self.cell)
            .finish()
    }
}
