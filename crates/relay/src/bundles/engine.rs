use std::{
    collections::HashSet,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::Utc;
use flashbake_primitives::prelude::*;
use flashbake_tezosio::{codec::OperationCodec, rpc::traits::ChainRpc, transport::BundleTransport};
use parking_lot::{Mutex, RwLock};
use tracing::*;

use super::{
    error::InjectError,
    pending::{PendingBundle, PendingSet},
};
use crate::{head::ActiveBranches, metrics::RelayMetrics, rights::AssignmentCache};

/// Drives pending bundles to inclusion, expiry or their deadline.
///
/// Each head confirms the bundles it included, expires the ones whose
/// branch left the live window and sends the rest to the baker of the next
/// level if that baker takes bundles. Sending repeats on every head until
/// one of the terminal outcomes is observed.
pub struct BundleRelay {
    chain: Arc<dyn ChainRpc>,
    codec: Arc<dyn OperationCodec>,
    transport: Arc<dyn BundleTransport>,
    branches: Arc<dyn ActiveBranches>,
    assignments: Arc<RwLock<AssignmentCache>>,
    metrics: RelayMetrics,
    expiration: Duration,
    pending: Mutex<PendingSet>,
    last_level: RwLock<Option<u64>>,
    bakers: Mutex<HashSet<Address>>,
}

impl BundleRelay {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        codec: Arc<dyn OperationCodec>,
        transport: Arc<dyn BundleTransport>,
        branches: Arc<dyn ActiveBranches>,
        assignments: Arc<RwLock<AssignmentCache>>,
        metrics: RelayMetrics,
        expiration: Duration,
    ) -> Self {
        Self {
            chain,
            codec,
            transport,
            branches,
            assignments,
            metrics,
            expiration,
            pending: Mutex::new(PendingSet::new()),
            last_level: RwLock::new(None),
            bakers: Mutex::new(HashSet::new()),
        }
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, hash: &OperationHash) -> bool {
        self.pending.lock().contains(hash)
    }

    /// Level of the last head processed.
    pub fn last_level(&self) -> Option<u64> {
        *self.last_level.read()
    }

    /// Accepts a single operation.
    pub async fn inject(self: &Arc<Self>, raw_hex: String) -> Result<OperationHash, InjectError> {
        self.inject_bundle(vec![raw_hex], false).await
    }

    /// Accepts an ordered bundle of operations. The first one identifies the
    /// bundle: its hash is returned and its inclusion confirms the bundle.
    pub async fn inject_bundle(
        self: &Arc<Self>,
        raw_transactions: Vec<String>,
        first_or_discard: bool,
    ) -> Result<OperationHash, InjectError> {
        if raw_transactions.is_empty() {
            return Err(InjectError::Empty);
        }

        let active = self.branches.active_branch_hashes();
        if active.is_empty() {
            return Err(InjectError::NotReady);
        }

        let mut ops = Vec::with_capacity(raw_transactions.len());
        for raw in &raw_transactions {
            ops.push(self.codec.parse(raw).await?);
        }
        let (hash, branch) = match ops.first() {
            Some(primary) => (primary.hash.clone(), primary.branch.clone()),
            None => return Err(InjectError::Empty),
        };

        if self.is_pending(&hash) {
            return Err(InjectError::Duplicate(hash));
        }

        for op in &ops {
            self.codec.precheck(op, &active).await?;
        }

        let transactions = ops.iter().map(|op| self.codec.to_wire_hex(op)).collect();
        let (id, pending) = {
            let mut set = self.pending.lock();
            let id = set
                .insert(hash.clone(), branch.clone(), transactions, first_or_discard)
                .ok_or_else(|| InjectError::Duplicate(hash.clone()))?;
            (id, set.len())
        };

        self.metrics.received.inc();
        self.metrics.pending.set(pending as i64);
        info!(%hash, %branch, txs = ops.len(), %first_or_discard, "accepted bundle");

        self.spawn_deadline(id);

        if let Some(level) = self.last_level() {
            let target = self.assignments.read().get_producer(level + 1).cloned();
            if let Some(target) = target {
                self.dispatch(&target, |b| b.id == id);
            }
        }

        Ok(hash)
    }

    /// Processes a new head.
    pub async fn on_block(&self, block: &BlockRef) {
        *self.last_level.write() = Some(block.level);

        match self.chain.get_block_operations(&block.hash).await {
            Ok(ops) => {
                let confirmed = self.pending.lock().take_where(|b| ops.contains(&b.hash));
                if !confirmed.is_empty() {
                    self.metrics.successful.inc_by(confirmed.len() as u64);
                    if let Some(baker) = &ops.baker {
                        let mut bakers = self.bakers.lock();
                        bakers.insert(baker.clone());
                        self.metrics.successful_bakers.set(bakers.len() as i64);
                    }
                    for b in &confirmed {
                        info!(
                            hash = %b.hash,
                            level = block.level,
                            baker = ?ops.baker,
                            sends = b.sent_count,
                            "bundle included"
                        );
                    }
                }
            }
            Err(e) => warn!(hash = %block.hash, err = %e, "could not fetch block operations"),
        }

        let active = self.branches.active_branch_hashes();
        let expired = self.pending.lock().take_where(|b| !active.contains(&b.branch));
        if !expired.is_empty() {
            self.metrics.expired.inc_by(expired.len() as u64);
            for b in &expired {
                info!(hash = %b.hash, branch = %b.branch, "bundle branch expired");
            }
        }

        let (target, next) = {
            let cache = self.assignments.read();
            (
                cache.get_producer(block.level + 1).cloned(),
                cache.next_producer(block.level + 1).cloned(),
            )
        };

        match &target {
            Some(target) => self.dispatch(target, |_| true),
            None => trace!(level = block.level + 1, "next baker takes no bundles"),
        }

        let wait = next
            .and_then(|a| a.estimated_time)
            .map(|t| (t - Utc::now()).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        self.metrics.block_wait_seconds.set(wait);
        self.metrics.pending.set(self.pending_count() as i64);
    }

    /// Sends the pending bundles matching `pred` to `target`, without
    /// waiting for the outcome. A bundle goes at most once to the baker of a
    /// given level.
    fn dispatch(&self, target: &Assignment, pred: impl Fn(&PendingBundle) -> bool) {
        let Some(endpoint) = target.endpoint() else {
            return;
        };

        let batch: Vec<_> = {
            let mut set = self.pending.lock();
            set.iter_mut()
                .filter(|b| b.last_target != Some(target.level) && pred(b))
                .map(|b| {
                    if b.sent_count > 0 {
                        self.metrics.resends.inc();
                    }
                    b.sent_count += 1;
                    b.last_target = Some(target.level);
                    (b.hash.clone(), b.request())
                })
                .collect()
        };
        if batch.is_empty() {
            return;
        }

        debug!(
            count = batch.len(),
            level = target.level,
            delegate = %target.delegate,
            %endpoint,
            "sending bundles"
        );

        for (hash, request) in batch {
            let transport = self.transport.clone();
            let metrics = self.metrics.clone();
            let endpoint = endpoint.to_owned();
            tokio::spawn(async move {
                match transport.send_bundle(&endpoint, &request).await {
                    Ok(()) => trace!(%hash, %endpoint, "bundle delivered"),
                    Err(e) => {
                        metrics.transmit_failures.inc();
                        warn!(%hash, %endpoint, err = %e, "bundle transmission failed");
                    }
                }
            });
        }
    }

    fn spawn_deadline(self: &Arc<Self>, id: u64) {
        let relay: Weak<Self> = Arc::downgrade(self);
        let expiration = self.expiration;
        tokio::spawn(async move {
            tokio::time::sleep(expiration).await;
            if let Some(relay) = relay.upgrade() {
                relay.on_deadline(id);
            }
        });
    }

    fn on_deadline(&self, id: u64) {
        let (dropped, pending) = {
            let mut set = self.pending.lock();
            (set.remove(id), set.len())
        };
        // Already confirmed or expired.
        let Some(bundle) = dropped else {
            return;
        };

        self.metrics.dropped.inc();
        self.metrics.pending.set(pending as i64);
        info!(hash = %bundle.hash, sends = bundle.sent_count, "bundle deadline passed, dropping");
    }
}

impl std::fmt::Debug for BundleRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleRelay")
            .field("expiration", &self.expiration)
            .field("pending", &self.pending_count())
            .field("last_level", &self.last_level())
            .finish()
    }
}
