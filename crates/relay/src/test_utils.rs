//! Deterministic stand-ins for the node, the codec, the registry and baker
//! endpoints.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flashbake_primitives::prelude::*;
use flashbake_tezosio::{
    codec::{CodecError, Envelope, OperationCodec, ParsedOperation, PrecheckError},
    registry::{RegistryError, RegistryLookup},
    rpc::{error::ClientError, traits::ChainRpc, types::BlockOperations, ClientResult, HeadStream},
    transport::{BundleTransport, TransmitError},
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::head::ActiveBranches;

/// Seconds between fake blocks.
pub const BLOCK_TIME: i64 = 8;

/// Delegate holding every right not assigned explicitly.
pub const DEFAULT_DELEGATE: &str = "tz1anon";

fn timestamp_of(level: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + level as i64 * BLOCK_TIME, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Lets spawned tasks on the current runtime run to their next await.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Default)]
struct ChainState {
    tag: String,
    blocks: BTreeMap<u64, BlockRef>,
    failing_headers: HashSet<u64>,
    header_calls: usize,
    queued_heads: Vec<u64>,
    fail_streams: bool,
    constants_failures: u32,
    constants_calls: usize,
    rights: HashMap<u64, Address>,
    failing_rights: HashSet<u64>,
    rights_calls: Vec<u64>,
    included: HashMap<u64, HashSet<OperationHash>>,
    fail_block_operations: bool,
}

impl ChainState {
    fn make_block(&self, level: u64) -> BlockRef {
        let predecessor = match level.checked_sub(1).and_then(|l| self.blocks.get(&l)) {
            Some(parent) => parent.hash.clone(),
            None => BlockHash::from("Bgenesis"),
        };
        BlockRef::new(
            format!("B{}{level}", self.tag).into(),
            predecessor,
            level,
            timestamp_of(level),
        )
    }

    fn tip(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }

    fn baker_of(&self, level: u64) -> Address {
        self.rights
            .get(&level)
            .cloned()
            .unwrap_or_else(|| Address::from(DEFAULT_DELEGATE))
    }
}

/// A node serving a single main chain that tests grow, fork and break.
///
/// Blocks are named `B{tag}{level}`, the tag being empty until a fork.
#[derive(Debug)]
pub struct FakeChain {
    ttl: u64,
    state: Mutex<ChainState>,
}

impl FakeChain {
    /// Chain with operation time to live `ttl` and no blocks yet.
    pub fn new(ttl: u64) -> Self {
        Self {
            ttl,
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Grows the current branch up to `level`.
    pub fn extend_to(&self, level: u64) {
        let mut st = self.state.lock();
        let from = st.tip().map_or(0, |t| t + 1);
        for l in from..=level {
            let b = st.make_block(l);
            st.blocks.insert(l, b);
        }
    }

    /// Replaces the blocks from `level` up to the tip with a branch named
    /// `tag`. The tip height doesn't change and later growth follows the
    /// new branch.
    pub fn fork_at(&self, level: u64, tag: &str) {
        let mut st = self.state.lock();
        st.tag = tag.to_owned();
        let Some(tip) = st.tip() else {
            return;
        };
        for l in level..=tip {
            let b = st.make_block(l);
            st.blocks.insert(l, b);
        }
    }

    /// Main-chain block at `level`.
    pub fn block(&self, level: u64) -> BlockRef {
        let st = self.state.lock();
        match st.blocks.get(&level) {
            Some(b) => b.clone(),
            None => panic!("fake chain has no block at {level}"),
        }
    }

    pub fn tip(&self) -> Option<u64> {
        self.state.lock().tip()
    }

    pub fn fail_headers_at(&self, levels: impl IntoIterator<Item = u64>) {
        self.state.lock().failing_headers = levels.into_iter().collect();
    }

    pub fn clear_header_failures(&self) {
        self.state.lock().failing_headers.clear();
    }

    pub fn header_calls(&self) -> usize {
        self.state.lock().header_calls
    }

    /// Heads the next opened stream yields before it ends.
    pub fn queue_heads(&self, levels: impl IntoIterator<Item = u64>) {
        self.state.lock().queued_heads.extend(levels);
    }

    pub fn fail_streams(&self, fail: bool) {
        self.state.lock().fail_streams = fail;
    }

    /// Makes the next `n` constants queries fail.
    pub fn fail_constants(&self, n: u32) {
        self.state.lock().constants_failures = n;
    }

    pub fn constants_calls(&self) -> usize {
        self.state.lock().constants_calls
    }

    /// Gives the round 0 right at `level` to `delegate`.
    pub fn assign(&self, level: u64, delegate: &str) {
        self.state.lock().rights.insert(level, Address::from(delegate));
    }

    /// Delegate baking `level`.
    pub fn baker_of(&self, level: u64) -> Address {
        self.state.lock().baker_of(level)
    }

    pub fn fail_rights_at(&self, levels: impl IntoIterator<Item = u64>) {
        self.state.lock().failing_rights = levels.into_iter().collect();
    }

    pub fn clear_rights_failures(&self) {
        self.state.lock().failing_rights.clear();
    }

    /// Levels rights were requested for, in request order.
    pub fn rights_calls(&self) -> Vec<u64> {
        self.state.lock().rights_calls.clone()
    }

    /// Puts `hash` in the block at `level`.
    pub fn include(&self, level: u64, hash: OperationHash) {
        self.state.lock().included.entry(level).or_default().insert(hash);
    }

    pub fn fail_block_operations(&self, fail: bool) {
        self.state.lock().fail_block_operations = fail;
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn head_stream(&self) -> ClientResult<HeadStream> {
        let mut st = self.state.lock();
        if st.fail_streams {
            return Err(ClientError::Connection("stream refused".into()));
        }
        let heads: Vec<ClientResult<BlockRef>> = std::mem::take(&mut st.queued_heads)
            .into_iter()
            .filter_map(|l| st.blocks.get(&l).cloned())
            .map(Ok)
            .collect();
        Ok(futures::stream::iter(heads).boxed())
    }

    async fn get_header(&self, level: u64) -> ClientResult<BlockRef> {
        let mut st = self.state.lock();
        st.header_calls += 1;
        if st.failing_headers.contains(&level) {
            return Err(ClientError::Timeout);
        }
        st.blocks
            .get(&level)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("block {level}")))
    }

    async fn get_block_operations(&self, block: &BlockHash) -> ClientResult<BlockOperations> {
        let st = self.state.lock();
        if st.fail_block_operations {
            return Err(ClientError::Connection("node unreachable".into()));
        }
        let level = st
            .blocks
            .values()
            .find(|b| &b.hash == block)
            .map(|b| b.level)
            .ok_or_else(|| ClientError::NotFound(format!("block {block}")))?;

        Ok(BlockOperations {
            level,
            baker: Some(st.baker_of(level)),
            hashes: st.included.get(&level).cloned().unwrap_or_default(),
        })
    }

    async fn get_baking_rights(&self, level: u64, max_round: u32) -> ClientResult<Vec<Assignment>> {
        let mut st = self.state.lock();
        st.rights_calls.push(level);
        if st.failing_rights.contains(&level) {
            return Err(ClientError::Status(500, "rights unavailable".into()));
        }

        let mut rights = vec![Assignment::new(level, st.baker_of(level), 0)
            .with_estimated_time(timestamp_of(level))];
        if max_round >= 1 {
            rights.push(
                Assignment::new(level, Address::from("tz1backup"), 1)
                    .with_estimated_time(timestamp_of(level) + chrono::Duration::seconds(BLOCK_TIME)),
            );
        }
        Ok(rights)
    }

    async fn get_constants(&self) -> ClientResult<ChainConstants> {
        let mut st = self.state.lock();
        st.constants_calls += 1;
        if st.constants_failures > 0 {
            st.constants_failures -= 1;
            return Err(ClientError::Status(503, "constants unavailable".into()));
        }
        Ok(ChainConstants {
            max_operations_time_to_live: self.ttl,
            blocks_per_cycle: self.ttl * 4,
            minimal_block_delay: BLOCK_TIME as u64,
        })
    }
}

/// Codec over readable test operations of the form `{branch}|{payload}`.
///
/// Payloads starting with `badsig` fail the signature check.
#[derive(Debug, Default)]
pub struct FakeCodec;

impl FakeCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn raw(branch: &str, payload: &str) -> String {
        format!("{branch}|{payload}")
    }

    pub fn hash_of(raw: &str) -> OperationHash {
        OperationHash::of_bytes(raw.as_bytes())
    }
}

#[async_trait]
impl OperationCodec for FakeCodec {
    async fn parse(&self, raw_hex: &str) -> Result<ParsedOperation, CodecError> {
        let Some((branch, payload)) = raw_hex.split_once('|') else {
            return Err(CodecError::TooShort(raw_hex.len()));
        };
        let envelope = Envelope {
            hash: Self::hash_of(raw_hex),
            branch: BlockHash::from(branch),
            signature: "sigfake".to_owned(),
            body_hex: payload.to_owned(),
        };
        Ok(ParsedOperation::new(envelope, Vec::new(), raw_hex))
    }

    async fn precheck(
        &self,
        op: &ParsedOperation,
        active_branches: &HashSet<BlockHash>,
    ) -> Result<(), PrecheckError> {
        if !active_branches.contains(&op.branch) {
            return Err(PrecheckError::Expired(op.branch.clone()));
        }
        if op.raw_hex().contains("|badsig") {
            return Err(PrecheckError::SignatureInvalid("forged".into()));
        }
        Ok(())
    }

    fn hash(&self, raw_hex: &str) -> Result<OperationHash, CodecError> {
        Ok(Self::hash_of(raw_hex))
    }
}

/// Transport recording every bundle it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, BundleRequest)>>,
    failing: Mutex<bool>,
    notify: Notify,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send fail after being recorded.
    pub fn fail(&self, fail: bool) {
        *self.failing.lock() = fail;
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent(&self) -> Vec<(String, BundleRequest)> {
        self.sent.lock().clone()
    }

    /// Waits until at least `n` sends were attempted.
    pub async fn wait_for(&self, n: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.attempts() >= n {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("saw {} sends, wanted {n}", self.attempts());
        }
    }
}

#[async_trait]
impl BundleTransport for RecordingTransport {
    async fn send_bundle(&self, endpoint: &str, bundle: &BundleRequest) -> Result<(), TransmitError> {
        self.sent.lock().push((endpoint.to_owned(), bundle.clone()));
        self.notify.notify_waiters();
        if *self.failing.lock() {
            return Err(TransmitError::Status(503, "busy".into()));
        }
        Ok(())
    }
}

/// Registry backed by a fixed table.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    endpoints: HashMap<Address, String>,
    lookups: AtomicUsize,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, delegate: &str, endpoint: &str) -> Self {
        self.endpoints
            .insert(Address::from(delegate), endpoint.to_owned());
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RegistryLookup for StaticRegistry {
    async fn lookup_endpoint(&self, delegate: &Address) -> Result<Option<String>, RegistryError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.endpoints.get(delegate).cloned())
    }
}

/// Active branch set the test controls directly.
#[derive(Debug, Default)]
pub struct StaticBranches {
    hashes: Mutex<HashSet<BlockHash>>,
}

impl StaticBranches {
    pub fn new<H: Into<BlockHash>>(hashes: impl IntoIterator<Item = H>) -> Self {
        let branches = Self::default();
        branches.set(hashes);
        branches
    }

    pub fn set<H: Into<BlockHash>>(&self, hashes: impl IntoIterator<Item = H>) {
        *self.hashes.lock() = hashes.into_iter().map(Into::into).collect();
    }
}

impl ActiveBranches for StaticBranches {
    fn active_branch_hashes(&self) -> HashSet<BlockHash> {
        self.hashes.lock().clone()
    }
}
