use async_trait::async_trait;
use flashbake_primitives::prelude::*;

use super::{types::BlockOperations, ClientResult, HeadStream};

/// The chain queries the relay's scheduling core depends on.
#[async_trait]
pub trait ChainRpc: Sync + Send + 'static {
    /// Opens the stream of new heads on the main chain.
    async fn head_stream(&self) -> ClientResult<HeadStream>;

    /// Fetches the header of the main-chain block at `level`.
    async fn get_header(&self, level: u64) -> ClientResult<BlockRef>;

    /// Fetches the operation hashes and producer of a block.
    async fn get_block_operations(&self, block: &BlockHash) -> ClientResult<BlockOperations>;

    /// Fetches baking rights at `level` up to `max_round`.
    async fn get_baking_rights(&self, level: u64, max_round: u32) -> ClientResult<Vec<Assignment>>;

    /// Fetches the protocol constants at head.
    async fn get_constants(&self) -> ClientResult<ChainConstants>;
}
