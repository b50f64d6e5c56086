use std::collections::{BTreeMap, BTreeSet, HashMap};

use flashbake_primitives::prelude::*;
use flashbake_tezosio::{
    registry::{RegistryError, RegistryLookup},
    rpc::{error::ClientError, traits::ChainRpc},
};
use futures::{StreamExt, TryStreamExt};
use thiserror::Error;
use tracing::*;

#[derive(Debug, Error)]
pub enum RightsError {
    #[error("fetching rights at level {0}: {1}")]
    Rights(u64, #[source] ClientError),

    #[error("looking up endpoint of {0}: {1}")]
    Registry(Address, #[source] RegistryError),
}

/// Fetches the best right of every level in `start..=end` and resolves each
/// distinct delegate's endpoint once.
///
/// Either every level resolves or the whole batch is an error.
pub async fn fetch_window_assignments(
    chain: &dyn ChainRpc,
    registry: &dyn RegistryLookup,
    (start, end): (u64, u64),
    max_round: u32,
    concurrency: usize,
) -> Result<Vec<Assignment>, RightsError> {
    let concurrency = concurrency.max(1);

    let per_level: Vec<Vec<Assignment>> = futures::stream::iter(start..=end)
        .map(|level| async move {
            chain
                .get_baking_rights(level, max_round)
                .await
                .map_err(|e| RightsError::Rights(level, e))
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    let mut best: BTreeMap<u64, Assignment> = BTreeMap::new();
    for a in per_level.into_iter().flatten() {
        if a.level < start || a.level > end {
            continue;
        }
        match best.get(&a.level) {
            Some(cur) if cur.round <= a.round => {}
            _ => {
                best.insert(a.level, a);
            }
        }
    }

    let delegates: BTreeSet<Address> = best.values().map(|a| a.delegate.clone()).collect();
    trace!(%start, %end, delegates = delegates.len(), "resolving endpoints");

    let endpoints: HashMap<Address, Option<String>> = futures::stream::iter(delegates)
        .map(|delegate| async move {
            match registry.lookup_endpoint(&delegate).await {
                Ok(ep) => Ok((delegate, ep)),
                Err(e) => Err(RightsError::Registry(delegate, e)),
            }
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    Ok(best
        .into_values()
        .map(|mut a| {
            a.endpoint = endpoints.get(&a.delegate).cloned().flatten();
            a
        })
        .collect())
}
