use std::collections::{BTreeMap, HashSet};

use flashbake_primitives::prelude::*;

/// Lowest level kept in a window of `ttl` blocks ending at `head`.
pub fn window_floor(head: u64, ttl: u64) -> u64 {
    head.saturating_sub(ttl.saturating_sub(1))
}

/// Recent main-chain headers, keyed by level.
#[derive(Debug, Default, Clone)]
pub struct RecentBlocks {
    blocks: BTreeMap<u64, BlockRef>,
}

impl RecentBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a block, replacing whatever we had at its level.
    pub fn insert(&mut self, block: BlockRef) -> Option<BlockRef> {
        self.blocks.insert(block.level, block)
    }

    pub fn get(&self, level: u64) -> Option<&BlockRef> {
        self.blocks.get(&level)
    }

    pub fn remove(&mut self, level: u64) -> Option<BlockRef> {
        self.blocks.remove(&level)
    }

    pub fn contains(&self, level: u64) -> bool {
        self.blocks.contains_key(&level)
    }

    /// The highest block we have.
    pub fn head(&self) -> Option<&BlockRef> {
        self.blocks.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drops blocks above `level`, which belong to a branch the node left.
    pub fn truncate_above(&mut self, level: u64) -> usize {
        let dropped = self.blocks.split_off(&(level + 1));
        dropped.len()
    }

    /// Drops every level `L` with `head - L >= ttl`.
    pub fn evict(&mut self, head: u64, ttl: u64) -> usize {
        let keep = self.blocks.split_off(&window_floor(head, ttl));
        let evicted = self.blocks.len();
        self.blocks = keep;
        evicted
    }

    /// Levels of the window ending at `head` that we have no block for.
    pub fn missing_levels(&self, head: u64, ttl: u64) -> Vec<u64> {
        (window_floor(head, ttl)..=head)
            .filter(|l| !self.contains(*l))
            .collect()
    }

    /// Returns if every level of the window ending at `head` is present.
    pub fn is_complete(&self, head: u64, ttl: u64) -> bool {
        (window_floor(head, ttl)..=head).all(|l| self.contains(l))
    }

    /// Hashes of all retained blocks.
    pub fn hashes(&self) -> HashSet<BlockHash> {
        self.blocks.values().map(|b| b.hash.clone()).collect()
    }

    /// Checks that every adjacent pair of present levels is hash-linked.
    pub fn is_connected(&self) -> bool {
        self.first_broken_link().is_none()
    }

    /// Returns the lowest level whose predecessor link to the level below
    /// doesn't match, if any.
    pub fn first_broken_link(&self) -> Option<u64> {
        self.blocks
            .values()
            .zip(self.blocks.values().skip(1))
            .find(|(parent, child)| parent.level + 1 == child.level && !child.extends(parent))
            .map(|(_, child)| child.level)
    }

    /// Iterates over the blocks back from the tip.
    pub fn iter_blocks_back(&self) -> impl Iterator<Item = &BlockRef> {
        self.blocks.values().rev()
    }
}
