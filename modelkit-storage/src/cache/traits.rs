//! Cache backend trait and slot type.
//!
//! This module defines the traits that must be implemented by cache backends.

use modelkit_core::StoreResult;
use std::collections::{BTreeSet, HashMap};

/// A cached lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheSlot<V> {
    /// The store returned this value.
    Present(V),
    /// The store confirmed the key does not exist.
    Absent,
}

impl<V> CacheSlot<V> {
    pub fn from_option(value: Option<V>) -> Self {
        match value {
            Some(v) => CacheSlot::Present(v),
            None => CacheSlot::Absent,
        }
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            CacheSlot::Present(v) => Some(v),
            CacheSlot::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CacheSlot::Absent)
    }
}

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations should be thread-safe and support concurrent access.
///
/// # Removal scope
///
/// `remove`/`remove_all` drop the entry on every node that replicates it.
/// `remove_local`/`remove_all_local` only touch this node's partition; use
/// them when another mechanism already propagates the invalidation.
///
/// # Generations
///
/// Every removal advances the node's generation, whether or not the key was
/// cached. A reader takes the generation before going to the store and fills
/// the slot with [`put_if_generation`](CacheBackend::put_if_generation), so a
/// value fetched before a concurrent invalidation is never cached after it.
pub trait CacheBackend<K, V>: Send + Sync {
    /// Get a slot, or `None` on a miss.
    fn get(&self, key: &K) -> StoreResult<Option<CacheSlot<V>>>;

    /// Get many slots. Misses are omitted from the result.
    fn get_all(&self, keys: &BTreeSet<K>) -> StoreResult<HashMap<K, CacheSlot<V>>>;

    fn put(&self, key: K, slot: CacheSlot<V>) -> StoreResult<()>;

    /// Current invalidation generation of this node.
    fn generation(&self) -> StoreResult<u64>;

    /// Store `slot` only if no removal happened since `generation` was read.
    /// Returns whether the slot was stored.
    fn put_if_generation(
        &self,
        key: K,
        slot: CacheSlot<V>,
        generation: u64,
    ) -> StoreResult<bool>;

    /// Cluster-wide removal.
    fn remove(&self, key: &K) -> StoreResult<()>;

    /// Cluster-wide bulk removal.
    fn remove_all(&self, keys: &BTreeSet<K>) -> StoreResult<()>;

    /// Remove from this node only.
    fn remove_local(&self, key: &K) -> StoreResult<()>;

    /// Bulk remove from this node only.
    fn remove_all_local(&self, keys: &BTreeSet<K>) -> StoreResult<()>;

    /// Get cache statistics.
    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits, including negative hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hits that found an `Absent` slot.
    pub negative_hits: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of entries dropped by invalidation.
    pub removals: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
