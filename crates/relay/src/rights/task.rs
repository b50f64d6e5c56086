use std::{collections::BTreeSet, sync::Arc};

use flashbake_config::RightsConfig;
use flashbake_primitives::prelude::*;
use flashbake_tezosio::{registry::RegistryLookup, rpc::traits::ChainRpc};
use parking_lot::RwLock;
use tracing::*;

use super::{
    cache::AssignmentCache,
    fetch::{fetch_window_assignments, RightsError},
};
use crate::{
    observer::Subscription,
    window::{WindowEvent, WindowSchedule},
};

#[derive(Clone, Debug)]
pub struct RightsParams {
    pub max_round: u32,
    pub concurrency: usize,
    /// How many windows ahead of the current one are kept resolved.
    pub lead: u64,
}

impl From<&RightsConfig> for RightsParams {
    fn from(config: &RightsConfig) -> Self {
        Self {
            max_round: config.max_round,
            concurrency: config.fetch_concurrency.max(1),
            lead: config.window_lead,
        }
    }
}

/// Keeps the assignment cache populated ahead of the chain.
pub struct RightsService {
    chain: Arc<dyn ChainRpc>,
    registry: Arc<dyn RegistryLookup>,
    schedule: WindowSchedule,
    params: RightsParams,
    cache: Arc<RwLock<AssignmentCache>>,
    current: Option<u64>,
    failed: BTreeSet<u64>,
}

impl RightsService {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        registry: Arc<dyn RegistryLookup>,
        schedule: WindowSchedule,
        params: RightsParams,
        cache: Arc<RwLock<AssignmentCache>>,
    ) -> Self {
        Self {
            chain,
            registry,
            schedule,
            params,
            cache,
            current: None,
            failed: BTreeSet::new(),
        }
    }

    pub fn cache(&self) -> &Arc<RwLock<AssignmentCache>> {
        &self.cache
    }

    pub fn current_window(&self) -> Option<u64> {
        self.current
    }

    /// Windows whose last refresh failed and will be retried.
    pub fn failed_windows(&self) -> impl Iterator<Item = u64> + '_ {
        self.failed.iter().copied()
    }

    /// Resolves the rights of `window` and commits them, all or nothing.
    pub async fn refresh_window(&mut self, window: u64) -> Result<usize, RightsError> {
        let span = self.schedule.span(window);
        debug!(%window, start = span.0, end = span.1, "fetching window assignments");

        let res = fetch_window_assignments(
            self.chain.as_ref(),
            self.registry.as_ref(),
            span,
            self.params.max_round,
            self.params.concurrency,
        )
        .await;

        match res {
            Ok(batch) => {
                let with_endpoint = batch.iter().filter(|a| a.endpoint().is_some()).count();
                let n = self.cache.write().commit(batch);
                self.failed.remove(&window);
                info!(%window, levels = n, %with_endpoint, "window assignments ready");
                Ok(n)
            }
            Err(e) => {
                warn!(%window, err = %e, "window refresh failed, will retry on next advance");
                self.failed.insert(window);
                Err(e)
            }
        }
    }

    /// Resolves the current window and the ones in the lead, since no
    /// earlier advance prefetched them.
    pub async fn on_cold_start(&mut self, block: &BlockRef) {
        let window = self.schedule.window_of(block.level);
        self.current = Some(window);
        info!(%window, level = block.level, "cold start, resolving initial windows");

        for w in window..=window + self.params.lead {
            let _ = self.refresh_window(w).await;
        }
    }

    /// Drops passed levels and prefetches up to the window `lead` ahead of
    /// the new one. Windows skipped over by a jump of more than one are
    /// fetched too, as is any window whose refresh failed and is still ahead.
    pub async fn on_window_advanced(&mut self, ev: &WindowEvent) {
        let window = ev.window;
        let prev = self.current.replace(window);

        let (start, _) = self.schedule.span(window);
        let pruned = self.cache.write().prune_below(start);
        trace!(%window, %pruned, "pruned passed assignments");

        let target = window + self.params.lead;
        let first_new = match prev {
            Some(p) if p < window => (p + self.params.lead + 1).max(window),
            _ => target,
        };
        if first_new < target {
            debug!(?prev, %window, "window jumped, catching up on skipped windows");
        }

        let mut due: BTreeSet<u64> = self.failed.iter().copied().filter(|w| *w >= window).collect();
        due.extend(first_new..=target);
        self.failed.retain(|w| *w >= window);

        for w in due {
            let _ = self.refresh_window(w).await;
        }
    }
}

impl std::fmt::Debug for RightsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RightsService")
            .field("params", &self.params)
            .field("current", &self.current)
            .field("failed", &self.failed)
            .finish()
    }
}

/// Cold starts on the first head, then refreshes on every window advance.
pub async fn rights_task(
    mut service: RightsService,
    mut blocks: Subscription<BlockRef>,
    mut windows: Subscription<WindowEvent>,
) {
    let Some(first) = blocks.recv().await else {
        warn!("head stream closed before the first block");
        return;
    };
    // Later heads are covered by window events.
    drop(blocks);

    service
        .on_cold_start(&first)
        .instrument(debug_span!("rights_cold_start", level = first.level))
        .await;

    while let Some(ev) = windows.recv().await {
        // The cold start may already cover windows that advanced meanwhile.
        if service.current_window().is_some_and(|w| ev.window <= w) {
            continue;
        }
        let window = ev.window;
        service
            .on_window_advanced(&ev)
            .instrument(debug_span!("rights_advance", %window))
            .await;
    }
    debug!("window subscription closed, rights task exiting");
}

#[cfg(test)]
mod tests {
    use flashbake_tezosio::registry::MockRegistryLookup;

    use super::*;
    use crate::test_utils::{FakeChain, StaticRegistry};

    fn service(chain: &Arc<FakeChain>, registry: Arc<dyn RegistryLookup>) -> RightsService {
        RightsService::new(
            chain.clone(),
            registry,
            WindowSchedule::uniform(100).unwrap(),
            RightsParams {
                max_round: 0,
                concurrency: 20,
                lead: 2,
            },
            Arc::new(RwLock::new(AssignmentCache::new(60))),
        )
    }

    fn advance(chain: &FakeChain, window: u64) -> WindowEvent {
        let level = window * 100;
        chain.extend_to(level);
        WindowEvent {
            window,
            block: chain.block(level),
        }
    }

    #[tokio::test]
    async fn advance_prefetches_two_windows_ahead() {
        let chain = Arc::new(FakeChain::new(60));
        let mut svc = service(&chain, Arc::new(StaticRegistry::new()));

        svc.on_window_advanced(&advance(&chain, 5)).await;

        let levels = chain.rights_calls();
        assert_eq!(levels.len(), 100);
        assert_eq!(levels.iter().min(), Some(&700));
        assert_eq!(levels.iter().max(), Some(&799));
        assert_eq!(svc.cache().read().len(), 100);
    }

    #[tokio::test]
    async fn cold_start_covers_current_and_lead() {
        let chain = Arc::new(FakeChain::new(60));
        chain.extend_to(450);
        let registry = StaticRegistry::new().with("tz1X", "http://x.example");
        chain.assign(620, "tz1X");
        let mut svc = service(&chain, Arc::new(registry));

        svc.on_cold_start(&chain.block(450)).await;

        assert_eq!(chain.rights_calls().len(), 300);
        let cache = svc.cache().read();
        assert!(cache.get(400).is_some());
        assert!(cache.get(699).is_some());
        assert_eq!(cache.next_producer(600).map(|a| a.level), Some(620));
    }

    #[tokio::test]
    async fn failed_window_is_retried_on_next_advance() {
        let chain = Arc::new(FakeChain::new(60));
        chain.fail_rights_at([750]);
        let mut svc = service(&chain, Arc::new(StaticRegistry::new()));

        svc.on_window_advanced(&advance(&chain, 5)).await;
        assert!(svc.cache().read().is_empty());
        assert_eq!(svc.failed_windows().collect::<Vec<_>>(), vec![7]);

        chain.clear_rights_failures();
        svc.on_window_advanced(&advance(&chain, 6)).await;

        let cache = svc.cache().read();
        assert!(cache.get(700).is_some());
        assert!(cache.get(899).is_some());
        assert_eq!(svc.failed_windows().count(), 0);
    }

    #[tokio::test]
    async fn advance_prunes_passed_levels() {
        let chain = Arc::new(FakeChain::new(60));
        let mut svc = service(&chain, Arc::new(StaticRegistry::new()));
        svc.on_cold_start(&advance(&chain, 5).block).await;
        assert!(svc.cache().read().get(500).is_some());

        svc.on_window_advanced(&advance(&chain, 6)).await;
        let cache = svc.cache().read();
        assert!(cache.get(599).is_none());
        assert!(cache.get(600).is_some());
        assert!(cache.get(899).is_some());
    }

    #[tokio::test]
    async fn jump_over_a_window_fetches_the_skipped_ones() {
        let chain = Arc::new(FakeChain::new(60));
        let mut svc = service(&chain, Arc::new(StaticRegistry::new()));
        svc.on_cold_start(&advance(&chain, 5).block).await;
        assert_eq!(chain.rights_calls().len(), 300);

        // 5 -> 7 without seeing 6
        svc.on_window_advanced(&advance(&chain, 7)).await;

        let calls = chain.rights_calls();
        assert_eq!(calls.len(), 500);
        assert!(calls[300..].iter().all(|l| (800..1000).contains(l)));
        let cache = svc.cache().read();
        assert!(cache.get(699).is_none());
        assert!(cache.get(700).is_some());
        assert!(cache.get(800).is_some());
        assert!(cache.get(999).is_some());
        assert_eq!(svc.current_window(), Some(7));
    }

    #[tokio::test]
    async fn registry_failure_leaves_window_empty() {
        let chain = Arc::new(FakeChain::new(60));
        let mut registry = MockRegistryLookup::new();
        registry.expect_lookup_endpoint().returning(|_| {
            Err(flashbake_tezosio::registry::RegistryError::Malformed(
                "bad entry".into(),
            ))
        });
        let mut svc = service(&chain, Arc::new(registry));

        assert!(svc.refresh_window(3).await.is_err());
        assert!(svc.cache().read().is_empty());
    }
}
