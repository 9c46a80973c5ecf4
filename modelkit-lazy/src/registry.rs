//! Per-pass registry of relation keys to load.

use std::collections::{BTreeMap, BTreeSet};

use modelkit_core::{ModelResult, RelationKey};
use tracing::trace;

use crate::loader::{Loaders, Resolved};
use crate::schema::TargetType;

/// Distinct `(target, key)` pairs collected during one walk.
///
/// However many slots reference the same row, it is requested once.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pending: BTreeMap<TargetType, BTreeSet<RelationKey>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Record a key to load. Returns `false` when it was already recorded.
    pub fn add(&mut self, target: TargetType, key: RelationKey) -> bool {
        self.pending.entry(target).or_default().insert(key)
    }

    pub fn contains(&self, target: TargetType, key: &RelationKey) -> bool {
        self.pending
            .get(&target)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Total number of distinct keys across all targets.
    pub fn len(&self) -> usize {
        self.pending.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(BTreeSet::is_empty)
    }

    pub fn targets(&self) -> impl Iterator<Item = TargetType> + '_ {
        self.pending.keys().copied()
    }

    /// Issue one batch per target.
    ///
    /// Fails with `MissingLoader` before any batch runs if a target has no
    /// registered loader.
    pub fn load(&self, loaders: &Loaders) -> ModelResult<Resolved> {
        for target in self.targets() {
            loaders.get(target)?;
        }

        let mut resolved = Resolved::new();
        for (target, keys) in &self.pending {
            if keys.is_empty() {
                continue;
            }
            let loader = loaders.get(*target)?;
            let batch: Vec<RelationKey> = keys.iter().cloned().collect();
            trace!(family = %target, count = batch.len(), "Loading relation batch");
            let values = loader.load_batch(&batch)?;
            resolved.insert(*target, keys.clone(), values);
        }
        Ok(resolved)
    }
}
