use std::collections::{BTreeMap, HashMap};

use flashbake_primitives::prelude::*;

/// A bundle waiting to be included, keyed by its first operation.
#[derive(Clone, Debug)]
pub struct PendingBundle {
    /// Acceptance order. Also tells a bundle apart from a later one with
    /// the same hash.
    pub id: u64,
    pub hash: OperationHash,
    pub branch: BlockHash,
    /// Operations as sent to bakers, primary first.
    pub transactions: Vec<String>,
    pub first_or_discard: bool,
    pub sent_count: u32,
    /// Level of the baker it was last sent to.
    pub last_target: Option<u64>,
}

impl PendingBundle {
    pub fn request(&self) -> BundleRequest {
        BundleRequest {
            transactions: self.transactions.clone(),
            first_or_discard: self.first_or_discard,
        }
    }
}

/// Pending bundles in acceptance order, indexed by primary hash.
#[derive(Debug, Default)]
pub struct PendingSet {
    next_id: u64,
    bundles: BTreeMap<u64, PendingBundle>,
    by_hash: HashMap<OperationHash, u64>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn contains(&self, hash: &OperationHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &OperationHash) -> Option<&PendingBundle> {
        self.by_hash.get(hash).and_then(|id| self.bundles.get(id))
    }

    /// Adds a bundle unless one with the same primary hash is pending.
    /// Returns the id it was given.
    pub fn insert(
        &mut self,
        hash: OperationHash,
        branch: BlockHash,
        transactions: Vec<String>,
        first_or_discard: bool,
    ) -> Option<u64> {
        if self.by_hash.contains_key(&hash) {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.by_hash.insert(hash.clone(), id);
        self.bundles.insert(
            id,
            PendingBundle {
                id,
                hash,
                branch,
                transactions,
                first_or_discard,
                sent_count: 0,
                last_target: None,
            },
        );
        Some(id)
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingBundle> {
        let bundle = self.bundles.remove(&id)?;
        self.by_hash.remove(&bundle.hash);
        Some(bundle)
    }

    /// Removes and returns every bundle matching `pred`, in acceptance order.
    pub fn take_where(&mut self, mut pred: impl FnMut(&PendingBundle) -> bool) -> Vec<PendingBundle> {
        let ids: Vec<u64> = self
            .bundles
            .values()
            .filter(|b| pred(b))
            .map(|b| b.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingBundle> {
        self.bundles.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingBundle> {
        self.bundles.values_mut()
    }
}
