use std::sync::Arc;

use flashbake_primitives::prelude::*;
use tracing::*;

use super::engine::BundleRelay;
use crate::observer::Subscription;

/// Feeds heads to the relay one at a time, in stream order.
pub async fn bundle_relay_task(relay: Arc<BundleRelay>, mut blocks: Subscription<BlockRef>) {
    while let Some(block) = blocks.recv().await {
        let level = block.level;
        relay
            .on_block(&block)
            .instrument(debug_span!("relay_block", %level))
            .await;
    }
    debug!("head subscription closed, bundle relay exiting");
}
