use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use flashbake_common::retry::{policies::FixedInterval, retry_with_backoff};
use flashbake_config::MonitorConfig;
use flashbake_primitives::prelude::*;
use flashbake_tezosio::rpc::{error::ClientError, traits::ChainRpc};
use futures::StreamExt;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::*;

use super::state::{window_floor, RecentBlocks};
use crate::observer::{Publisher, Subscription};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("head stream unavailable after {0} attempts: {1}")]
    RetriesExhausted(u32, ClientError),
}

/// Knobs for the head tracker.
#[derive(Clone, Debug)]
pub struct TrackerParams {
    /// Blocks kept in the window, the operation time to live.
    pub ttl: u64,
    pub lookback: u64,
    pub prefill_concurrency: usize,
    pub retry_interval: Duration,
    pub retry_attempts: u32,
}

impl TrackerParams {
    pub fn from_config(ttl: u64, config: &MonitorConfig) -> Self {
        Self {
            ttl,
            lookback: config.backfill_lookback,
            prefill_concurrency: config.prefill_concurrency.max(1),
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            retry_attempts: config.retry_attempts,
        }
    }
}

/// Query for whether operations anchored on a branch can still be included.
pub trait ActiveBranches: Sync + Send + 'static {
    /// Hashes of every block currently in the live window.
    fn active_branch_hashes(&self) -> HashSet<BlockHash>;
}

/// Follows the node's head stream and keeps a hash-linked window of the last
/// `ttl` blocks.
///
/// Subscribers only hear about heads once the window has been filled, so
/// nothing downstream schedules against a partial view of the chain.
pub struct HeadTracker {
    client: Arc<dyn ChainRpc>,
    params: TrackerParams,
    blocks: RwLock<RecentBlocks>,
    started: AtomicBool,
    stopped: AtomicBool,
    publisher: Publisher<BlockRef>,
}

impl HeadTracker {
    pub fn new(client: Arc<dyn ChainRpc>, params: TrackerParams) -> Self {
        Self {
            client,
            params,
            blocks: RwLock::new(RecentBlocks::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            publisher: Publisher::new(),
        }
    }

    /// Subscribes to new heads. Events flow once the tracker has started.
    pub fn subscribe(&self) -> Subscription<BlockRef> {
        self.publisher.subscribe()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Latest head we accepted.
    pub fn head(&self) -> Option<BlockRef> {
        self.blocks.read().head().cloned()
    }

    /// Snapshot of the retained window.
    pub fn blocks(&self) -> RecentBlocks {
        self.blocks.read().clone()
    }

    /// Spawns the task following the head stream.
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<(), TrackerError>> {
        self.stopped.store(false, Ordering::Release);
        let tracker = self.clone();
        tokio::spawn(async move { tracker.follow_heads().await })
    }

    /// Stops notifying subscribers. Requests already in flight complete but
    /// their results are thrown away.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.started.store(false, Ordering::Release);
        info!("head tracker stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    async fn follow_heads(&self) -> Result<(), TrackerError> {
        let backoff = FixedInterval::new(self.params.retry_interval.as_millis() as u64);

        while !self.is_stopped() {
            let mut heads = retry_with_backoff(
                "open head stream",
                Some(self.params.retry_attempts),
                &backoff,
                || self.client.head_stream(),
            )
            .await
            .map_err(|e| {
                error!(err = %e, "head stream retries exhausted, chain view is now stale");
                TrackerError::RetriesExhausted(self.params.retry_attempts, e)
            })?;

            while let Some(item) = heads.next().await {
                if self.is_stopped() {
                    break;
                }

                match item {
                    Ok(block) => {
                        let level = block.level;
                        self.handle_head(block)
                            .instrument(debug_span!("head", %level))
                            .await;
                    }
                    Err(ClientError::Parse(e)) => warn!(err = %e, "skipping malformed head"),
                    Err(e) => {
                        warn!(err = %e, "head stream broke");
                        break;
                    }
                }
            }

            if !self.is_stopped() {
                debug!("head stream ended, reconnecting");
                tokio::time::sleep(self.params.retry_interval).await;
            }
        }

        Ok(())
    }

    /// Processes one head from the stream.
    pub async fn handle_head(&self, block: BlockRef) {
        let head_level = block.level;
        {
            let mut blocks = self.blocks.write();
            let dropped = blocks.truncate_above(head_level);
            if dropped > 0 {
                info!(%head_level, %dropped, "head moved back, dropping abandoned blocks");
            }
            if let Some(prev) = blocks.insert(block.clone()) {
                if prev.hash != block.hash {
                    info!(%head_level, old = %prev.hash, new = %block.hash, "reorg");
                }
            }
        }

        if !self.is_started() {
            self.prefill(head_level).await;
        }
        self.backfill(head_level).await;

        let complete = {
            let mut blocks = self.blocks.write();
            blocks.evict(head_level, self.params.ttl);
            blocks.is_complete(head_level, self.params.ttl)
        };

        if self.is_stopped() {
            trace!("stopped, discarding head");
            return;
        }

        if !self.is_started() {
            if !complete {
                debug!("window still filling");
                return;
            }
            self.started.store(true, Ordering::Release);
            info!(%head_level, ttl = self.params.ttl, "head tracker started");
        }

        trace!(hash = %block.hash, "publishing head");
        self.publisher.publish(block);
    }

    /// Fetches every missing level of the window at once, used to fill it
    /// the first time.
    async fn prefill(&self, head_level: u64) {
        let missing = self.blocks.read().missing_levels(head_level, self.params.ttl);
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "prefilling window");

        let fetched: Vec<_> = futures::stream::iter(missing)
            .map(|level| async move { (level, self.client.get_header(level).await) })
            .buffer_unordered(self.params.prefill_concurrency)
            .collect()
            .await;

        let mut blocks = self.blocks.write();
        for (level, res) in fetched {
            match res {
                // Don't clobber anything a newer event stored meanwhile.
                Ok(header) if !blocks.contains(level) => {
                    blocks.insert(header);
                }
                Ok(_) => {}
                Err(e) => warn!(%level, err = %e, "failed to prefill header"),
            }
        }
    }

    /// Walks back from `head_level` checking each predecessor link, fetching
    /// ancestors that are missing or don't match.
    ///
    /// At most `lookback` links are examined per call. A failed fetch, or an
    /// ancestor that doesn't match its child, stops the walk; the gap stays
    /// and the next head retries it.
    async fn backfill(&self, head_level: u64) {
        let floor = window_floor(head_level, self.params.ttl);
        let mut level = head_level;
        let mut budget = self.params.lookback;

        while level > floor && budget > 0 {
            budget -= 1;
            let parent_level = level - 1;

            let wanted = {
                let blocks = self.blocks.read();
                let Some(child) = blocks.get(level) else {
                    break;
                };
                match blocks.get(parent_level) {
                    Some(parent) if child.extends(parent) => None,
                    _ => Some(child.predecessor.clone()),
                }
            };

            if let Some(wanted) = wanted {
                match self.client.get_header(parent_level).await {
                    Ok(header) if header.hash != wanted => {
                        // The node is on another branch than the child. Leave a
                        // gap instead of a broken link; the next head fills it.
                        warn!(
                            level = parent_level,
                            expected = %wanted,
                            got = %header.hash,
                            "node returned a different ancestor"
                        );
                        self.blocks.write().remove(parent_level);
                        break;
                    }
                    Ok(header) => {
                        trace!(level = parent_level, "backfilled ancestor");
                        self.blocks.write().insert(header);
                    }
                    Err(e) => {
                        warn!(level = parent_level, err = %e, "failed to backfill ancestor");
                        break;
                    }
                }
            }

            level = parent_level;
        }
    }
}

impl ActiveBranches for HeadTracker {
    fn active_branch_hashes(&self) -> HashSet<BlockHash> {
        self.blocks.read().hashes()
    }
}

impl std::fmt::Debug for HeadTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadTracker")
            .field("params", &self.params)
            .field("started", &self.is_started())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeChain;

    fn params(ttl: u64) -> TrackerParams {
        TrackerParams {
            ttl,
            lookback: ttl,
            prefill_concurrency: 4,
            retry_interval: Duration::from_millis(1),
            retry_attempts: 3,
        }
    }

    fn tracker(chain: &Arc<FakeChain>, ttl: u64) -> HeadTracker {
        HeadTracker::new(chain.clone(), params(ttl))
    }

    #[tokio::test]
    async fn fills_window_before_publishing() {
        let chain = Arc::new(FakeChain::new(10));
        chain.extend_to(50);
        let tracker = tracker(&chain, 10);
        let mut sub = tracker.subscribe();

        tracker.handle_head(chain.block(50)).await;

        assert!(tracker.is_started());
        assert_eq!(sub.try_recv().map(|b| b.level), Some(50));
        let blocks = tracker.blocks();
        assert_eq!(blocks.len(), 10);
        assert!(blocks.is_complete(50, 10));
        assert!(blocks.is_connected());
    }

    #[tokio::test]
    async fn does_not_start_on_partial_window() {
        let chain = Arc::new(FakeChain::new(10));
        chain.extend_to(50);
        chain.fail_headers_at([45]);
        let tracker = tracker(&chain, 10);
        let mut sub = tracker.subscribe();

        tracker.handle_head(chain.block(50)).await;
        assert!(!tracker.is_started());
        assert!(sub.try_recv().is_none());

        chain.clear_header_failures();
        chain.extend_to(51);
        tracker.handle_head(chain.block(51)).await;
        assert!(tracker.is_started());
        assert_eq!(sub.try_recv().map(|b| b.level), Some(51));
    }

    #[tokio::test]
    async fn starts_near_genesis() {
        let chain = Arc::new(FakeChain::new(10));
        chain.extend_to(3);
        let tracker = tracker(&chain, 10);

        tracker.handle_head(chain.block(3)).await;
        assert!(tracker.is_started());
        assert_eq!(tracker.blocks().len(), 4);
    }

    #[tokio::test]
    async fn backfills_reorged_ancestors() {
        let chain = Arc::new(FakeChain::new(10));
        chain.extend_to(30);
        let tracker = tracker(&chain, 10);
        tracker.handle_head(chain.block(30)).await;

        // Node switches to a fork starting at 28, we only hear about its tip.
        chain.fork_at(28, "f");
        chain.extend_to(31);
        tracker.handle_head(chain.block(31)).await;

        let blocks = tracker.blocks();
        assert!(blocks.is_connected());
        assert_eq!(blocks.get(28).unwrap().hash, chain.block(28).hash);
        assert_eq!(blocks.get(27).unwrap().hash, chain.block(27).hash);
        assert!(!tracker.active_branch_hashes().contains(&"B30".into()));
    }

    #[tokio::test]
    async fn backfill_respects_lookback() {
        let chain = Arc::new(FakeChain::new(10));
        chain.extend_to(30);
        let tracker = HeadTracker::new(
            chain.clone(),
            TrackerParams {
                lookback: 1,
                ..params(10)
            },
        );
        tracker.handle_head(chain.block(30)).await;

        chain.fork_at(27, "f");
        chain.extend_to(31);
        let calls = chain.header_calls();
        tracker.handle_head(chain.block(31)).await;

        // only the link 31 -> 30 was examined, 30 -> 29 is left broken
        assert_eq!(chain.header_calls(), calls + 1);
        assert_eq!(tracker.blocks().first_broken_link(), Some(30));
    }

    #[tokio::test]
    async fn mismatched_ancestor_leaves_a_gap_not_a_broken_link() {
        let chain = Arc::new(FakeChain::new(10));
        chain.extend_to(30);
        let tracker = tracker(&chain, 10);
        tracker.handle_head(chain.block(30)).await;

        // a head built on a block the node no longer serves at 30
        let stale = BlockRef::new("Bx31".into(), "Bx30".into(), 31, chain.block(30).timestamp);
        let calls = chain.header_calls();
        tracker.handle_head(stale).await;

        let blocks = tracker.blocks();
        assert_eq!(chain.header_calls(), calls + 1);
        assert!(blocks.is_connected());
        assert!(!blocks.contains(30));
        assert!(blocks.contains(29));
        assert_eq!(blocks.head().map(|b| b.level), Some(31));

        // once the node serves the head's branch, the gap is filled
        chain.extend_to(31);
        tracker.handle_head(chain.block(31)).await;
        let blocks = tracker.blocks();
        assert!(blocks.is_connected());
        assert!(blocks.is_complete(31, 10));
    }

    #[tokio::test]
    async fn continuity_holds_over_a_run() {
        let chain = Arc::new(FakeChain::new(8));
        chain.extend_to(20);
        let tracker = tracker(&chain, 8);

        for level in 20..40 {
            chain.extend_to(level);
            if level == 33 {
                chain.fork_at(31, "g");
            }
            // skip some announcements like a lagging stream would
            if level % 3 != 0 {
                tracker.handle_head(chain.block(level)).await;
            }
            let blocks = tracker.blocks();
            assert!(blocks.is_connected(), "broken at level {level}");
            assert!(blocks.len() <= 8);
        }
    }

    #[tokio::test]
    async fn stop_silences_subscribers() {
        let chain = Arc::new(FakeChain::new(5));
        chain.extend_to(10);
        let tracker = tracker(&chain, 5);
        let mut sub = tracker.subscribe();

        tracker.handle_head(chain.block(10)).await;
        assert!(sub.try_recv().is_some());

        tracker.stop();
        chain.extend_to(11);
        tracker.handle_head(chain.block(11)).await;
        assert!(!tracker.is_started());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn follows_stream_and_gives_up_after_retries() {
        let chain = Arc::new(FakeChain::new(5));
        chain.extend_to(12);
        chain.queue_heads([10, 11, 12]);
        let tracker = Arc::new(tracker(&chain, 5));
        let mut sub = tracker.subscribe();

        let handle = tracker.start();
        for expected in 10..=12 {
            assert_eq!(sub.recv().await.map(|b| b.level), Some(expected));
        }

        // no more streams can be opened
        chain.fail_streams(true);
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(TrackerError::RetriesExhausted(3, _))));
    }
}
