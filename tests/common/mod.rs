#![allow(dead_code)]

use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use flashbake_primitives::prelude::*;
use flashbake_relay::{
    bundles::BundleRelay,
    head::{HeadTracker, TrackerParams},
    metrics::RelayMetrics,
    rights::{AssignmentCache, RightsParams, RightsService},
    test_utils::{settle, FakeChain, FakeCodec, StaticRegistry},
    window::{WindowMonitor, WindowSchedule},
};
use flashbake_tezosio::transport::{BundleTransport, TransmitError};
use parking_lot::{Mutex, RwLock};
use tracing::*;

/// Baker endpoints that queue what they receive. Each baker includes its
/// queue when it produces a block, unless it is marked lazy.
#[derive(Debug, Default)]
pub(crate) struct SimulatedBakers {
    inboxes: Mutex<HashMap<String, Vec<BundleRequest>>>,
    lazy: Mutex<Vec<String>>,
}

impl SimulatedBakers {
    pub(crate) fn endpoint_of(delegate: &str) -> String {
        format!("http://{delegate}.bakers.test")
    }

    pub(crate) fn set_lazy(&self, delegate: &str) {
        self.lazy.lock().push(Self::endpoint_of(delegate));
    }

    pub(crate) fn received(&self, delegate: &str) -> usize {
        self.inboxes
            .lock()
            .get(&Self::endpoint_of(delegate))
            .map_or(0, |v| v.len())
    }

    /// Operations `delegate` puts in the block it bakes.
    pub(crate) fn take_inclusions(&self, delegate: &str) -> Vec<OperationHash> {
        let endpoint = Self::endpoint_of(delegate);
        if self.lazy.lock().contains(&endpoint) {
            return Vec::new();
        }
        self.inboxes
            .lock()
            .remove(&endpoint)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|b| b.transactions)
            .map(|raw| FakeCodec::hash_of(&raw))
            .collect()
    }
}

#[async_trait]
impl BundleTransport for SimulatedBakers {
    async fn send_bundle(
        &self,
        endpoint: &str,
        bundle: &BundleRequest,
    ) -> Result<(), TransmitError> {
        self.inboxes
            .lock()
            .entry(endpoint.to_owned())
            .or_default()
            .push(bundle.clone());
        Ok(())
    }
}

/// A relay wired to a fake chain, stepped one block at a time.
pub(crate) struct Simulation {
    pub(crate) chain: Arc<FakeChain>,
    pub(crate) bakers: Arc<SimulatedBakers>,
    pub(crate) tracker: Arc<HeadTracker>,
    pub(crate) monitor: WindowMonitor,
    pub(crate) rights: RightsService,
    pub(crate) relay: Arc<BundleRelay>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tip", &self.chain.tip())
            .field("relay", &self.relay)
            .finish()
    }
}

impl Simulation {
    /// Chain grown to `start`. Each of `bakers` bakes its level and is
    /// registered; every other level goes to an unregistered delegate.
    pub(crate) async fn new(ttl: u64, start: u64, bakers: &[(u64, &str)]) -> Self {
        let chain = Arc::new(FakeChain::new(ttl));
        chain.extend_to(start);

        let mut registry = StaticRegistry::new();
        for (level, delegate) in bakers {
            chain.assign(*level, delegate);
            registry = registry.with(delegate, &SimulatedBakers::endpoint_of(delegate));
        }
        let simulated = Arc::new(SimulatedBakers::default());
        let tracker = Arc::new(HeadTracker::new(
            chain.clone(),
            TrackerParams {
                ttl,
                lookback: ttl,
                prefill_concurrency: 8,
                retry_interval: Duration::from_millis(1),
                retry_attempts: 3,
            },
        ));
        let schedule = WindowSchedule::uniform(ttl).expect("nonzero ttl");
        let cache = Arc::new(RwLock::new(AssignmentCache::new(ttl)));
        let rights = RightsService::new(
            chain.clone(),
            Arc::new(registry),
            schedule.clone(),
            RightsParams {
                max_round: 0,
                concurrency: 8,
                lead: 2,
            },
            cache.clone(),
        );
        let relay = Arc::new(BundleRelay::new(
            chain.clone(),
            Arc::new(FakeCodec::new()),
            simulated.clone(),
            tracker.clone(),
            cache,
            RelayMetrics::new().expect("metrics"),
            Duration::from_secs(3600),
        ));

        let mut sim = Self {
            chain,
            bakers: simulated,
            tracker,
            monitor: WindowMonitor::new(schedule),
            rights,
            relay,
        };

        let head = sim.chain.block(start);
        sim.tracker.handle_head(head.clone()).await;
        sim.monitor.on_block(&head);
        sim.rights.on_cold_start(&head).await;
        sim.relay.on_block(&head).await;
        settle().await;
        sim
    }

    /// Bakes the next block and lets every component react to it.
    pub(crate) async fn step(&mut self) -> BlockRef {
        let level = self.chain.tip().map_or(0, |t| t + 1);
        let baker = self.chain.baker_of(level);
        for hash in self.bakers.take_inclusions(baker.as_str()) {
            self.chain.include(level, hash);
        }
        self.chain.extend_to(level);

        let head = self.chain.block(level);
        self.tracker.handle_head(head.clone()).await;
        if let Some(ev) = self.monitor.on_block(&head) {
            self.rights.on_window_advanced(&ev).await;
        }
        self.relay.on_block(&head).await;
        settle().await;
        debug!(%level, %baker, pending = self.relay.pending_count(), "stepped");
        head
    }
}

/// Polls `check` until it holds or five seconds pass.
pub(crate) async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
