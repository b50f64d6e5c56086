use std::collections::HashMap;

use flashbake_primitives::prelude::*;

/// Upcoming baking rights by level, with the endpoint of each baker that
/// takes bundles.
///
/// Only the best (lowest round) right per level is kept, since that is the
/// baker expected to produce the block.
#[derive(Debug, Default, Clone)]
pub struct AssignmentCache {
    ttl: u64,
    levels: HashMap<u64, Assignment>,
}

impl AssignmentCache {
    /// Creates a cache whose producer searches look at most `ttl` levels
    /// ahead.
    pub fn new(ttl: u64) -> Self {
        Self {
            ttl,
            levels: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, level: u64) -> Option<&Assignment> {
        self.levels.get(&level)
    }

    /// Writes a fully resolved batch, replacing whatever was cached at its
    /// levels.
    pub fn commit(&mut self, batch: impl IntoIterator<Item = Assignment>) -> usize {
        let mut fresh: HashMap<u64, Assignment> = HashMap::new();
        for a in batch {
            match fresh.get(&a.level) {
                Some(cur) if cur.round <= a.round => {}
                _ => {
                    fresh.insert(a.level, a);
                }
            }
        }

        let n = fresh.len();
        self.levels.extend(fresh);
        n
    }

    /// The producer of `level` if it takes bundles.
    pub fn get_producer(&self, level: u64) -> Option<&Assignment> {
        self.levels.get(&level).filter(|a| a.endpoint().is_some())
    }

    /// First producer that takes bundles within `ttl` levels from
    /// `from_level`.
    pub fn next_producer(&self, from_level: u64) -> Option<&Assignment> {
        (from_level..from_level.saturating_add(self.ttl)).find_map(|l| self.get_producer(l))
    }

    /// Forgets every level below `level`.
    pub fn prune_below(&mut self, level: u64) -> usize {
        let before = self.levels.len();
        self.levels.retain(|l, _| *l >= level);
        before - self.levels.len()
    }
}
