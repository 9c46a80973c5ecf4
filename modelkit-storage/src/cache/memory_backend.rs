//! In-memory cache backends.

use super::traits::{CacheBackend, CacheSlot, CacheStats};
use modelkit_core::{StoreError, StoreResult};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Single-node cache partition.
///
/// A lone node has nobody to replicate to, so local and cluster-wide
/// removal are the same operation here.
#[derive(Debug)]
pub struct InMemoryCacheBackend<K, V> {
    entries: RwLock<HashMap<K, CacheSlot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    negative_hits: AtomicU64,
    removals: AtomicU64,
    /// Advanced under the entries write lock by every removal.
    generation: AtomicU64,
}

impl<K, V> Default for InMemoryCacheBackend<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            negative_hits: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K, V> InMemoryCacheBackend<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count_lookup(&self, slot: Option<&CacheSlot<V>>) {
        match slot {
            Some(slot) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if slot.is_absent() {
                    self.negative_hits.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn drop_keys<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> StoreResult<()>
    where
        K: 'a,
    {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        for key in keys {
            if entries.remove(key).is_some() {
                self.removals.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl<K, V> CacheBackend<K, V> for InMemoryCacheBackend<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> StoreResult<Option<CacheSlot<V>>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let slot = entries.get(key);
        self.count_lookup(slot);
        Ok(slot.cloned())
    }

    fn get_all(&self, keys: &BTreeSet<K>) -> StoreResult<HashMap<K, CacheSlot<V>>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let slot = entries.get(key);
            self.count_lookup(slot);
            if let Some(slot) = slot {
                found.insert(key.clone(), slot.clone());
            }
        }
        Ok(found)
    }

    fn put(&self, key: K, slot: CacheSlot<V>) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(key, slot);
        Ok(())
    }

    fn generation(&self) -> StoreResult<u64> {
        Ok(self.generation.load(Ordering::SeqCst))
    }

    fn put_if_generation(
        &self,
        key: K,
        slot: CacheSlot<V>,
        generation: u64,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        if self.generation.load(Ordering::SeqCst) != generation {
            return Ok(false);
        }
        entries.insert(key, slot);
        Ok(true)
    }

    fn remove(&self, key: &K) -> StoreResult<()> {
        self.drop_keys(std::iter::once(key))
    }

    fn remove_all(&self, keys: &BTreeSet<K>) -> StoreResult<()> {
        self.drop_keys(keys.iter())
    }

    fn remove_local(&self, key: &K) -> StoreResult<()> {
        self.remove(key)
    }

    fn remove_all_local(&self, keys: &BTreeSet<K>) -> StoreResult<()> {
        self.remove_all(keys)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            removals: self.removals.load(Ordering::Relaxed),
        }
    }
}

/// A node's cache partition plus handles to its peers.
///
/// Reads and writes go to the local partition. Cluster-wide removal is
/// forwarded to every peer so no node keeps serving an entry that was
/// invalidated elsewhere; local removal stays on this node.
pub struct ReplicatedCacheBackend<K, V> {
    local: Arc<dyn CacheBackend<K, V>>,
    peers: Vec<Arc<dyn CacheBackend<K, V>>>,
}

impl<K, V> ReplicatedCacheBackend<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(local: Arc<dyn CacheBackend<K, V>>) -> Self {
        Self {
            local,
            peers: Vec::new(),
        }
    }

    pub fn with_peer(mut self, peer: Arc<dyn CacheBackend<K, V>>) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl<K, V> CacheBackend<K, V> for ReplicatedCacheBackend<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> StoreResult<Option<CacheSlot<V>>> {
        self.local.get(key)
    }

    fn get_all(&self, keys: &BTreeSet<K>) -> StoreResult<HashMap<K, CacheSlot<V>>> {
        self.local.get_all(keys)
    }

    fn put(&self, key: K, slot: CacheSlot<V>) -> StoreResult<()> {
        self.local.put(key, slot)
    }

    fn generation(&self) -> StoreResult<u64> {
        self.local.generation()
    }

    fn put_if_generation(
        &self,
        key: K,
        slot: CacheSlot<V>,
        generation: u64,
    ) -> StoreResult<bool> {
        self.local.put_if_generation(key, slot, generation)
    }

    fn remove(&self, key: &K) -> StoreResult<()> {
        self.local.remove_local(key)?;
        for peer in &self.peers {
            peer.remove_local(key)?;
        }
        Ok(())
    }

    fn remove_all(&self, keys: &BTreeSet<K>) -> StoreResult<()> {
        self.local.remove_all_local(keys)?;
        for peer in &self.peers {
            peer.remove_all_local(keys)?;
        }
        Ok(())
    }

    fn remove_local(&self, key: &K) -> StoreResult<()> {
        self.local.remove_local(key)
    }

    fn remove_all_local(&self, keys: &BTreeSet<K>) -> StoreResult<()> {
        self.local.remove_all_local(keys)
    }

    fn stats(&self) -> CacheStats {
        self.local.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_counts_hits_and_misses() {
        let backend: InMemoryCacheBackend<i64, String> = InMemoryCacheBackend::new();
        assert!(backend.get(&1).unwrap().is_none());

        backend.put(1, CacheSlot::Present("a".to_string())).unwrap();
        backend.put(2, CacheSlot::Absent).unwrap();
        assert_eq!(
            backend.get(&1).unwrap(),
            Some(CacheSlot::Present("a".to_string()))
        );
        assert_eq!(backend.get(&2).unwrap(), Some(CacheSlot::Absent));

        let stats = backend.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.negative_hits, 1);
        assert_eq!(stats.entry_count, 2);
    }

    #[test]
    fn test_get_all_omits_misses() {
        let backend: InMemoryCacheBackend<i64, String> = InMemoryCacheBackend::new();
        backend.put(1, CacheSlot::Present("a".to_string())).unwrap();
        let keys: BTreeSet<i64> = [1, 2].into_iter().collect();

        let found = backend.get_all(&keys).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&1));
    }

    #[test]
    fn test_remove_all_counts_only_present() {
        let backend: InMemoryCacheBackend<i64, String> = InMemoryCacheBackend::new();
        backend.put(1, CacheSlot::Absent).unwrap();
        let keys: BTreeSet<i64> = [1, 2, 3].into_iter().collect();

        backend.remove_all(&keys).unwrap();
        assert!(backend.is_empty());
        assert_eq!(backend.stats().removals, 1);
    }

    #[test]
    fn test_put_if_generation_rejects_after_removal() {
        let backend: InMemoryCacheBackend<i64, String> = InMemoryCacheBackend::new();
        let generation = backend.generation().unwrap();

        // Removing a key that was never cached still advances the generation.
        backend.remove(&1).unwrap();
        assert!(!backend
            .put_if_generation(1, CacheSlot::Present("stale".to_string()), generation)
            .unwrap());
        assert!(!backend.contains(&1));

        let generation = backend.generation().unwrap();
        assert!(backend
            .put_if_generation(1, CacheSlot::Present("fresh".to_string()), generation)
            .unwrap());
        assert!(backend.contains(&1));
    }

    #[test]
    fn test_replicated_remove_advances_peer_generation() {
        let local = Arc::new(InMemoryCacheBackend::<i64, String>::new());
        let peer = Arc::new(InMemoryCacheBackend::<i64, String>::new());
        let replicated = ReplicatedCacheBackend::new(local.clone()).with_peer(peer.clone());
        let peer_generation = peer.generation().unwrap();

        replicated.remove(&1).unwrap();
        assert!(!peer
            .put_if_generation(1, CacheSlot::Absent, peer_generation)
            .unwrap());
        assert_eq!(replicated.generation().unwrap(), local.generation().unwrap());
    }

    #[test]
    fn test_replicated_remove_reaches_peers() {
        let local = Arc::new(InMemoryCacheBackend::<i64, String>::new());
        let peer = Arc::new(InMemoryCacheBackend::<i64, String>::new());
        let replicated = ReplicatedCacheBackend::new(local.clone()).with_peer(peer.clone());

        replicated.put(1, CacheSlot::Present("a".to_string())).unwrap();
        peer.put(1, CacheSlot::Present("a".to_string())).unwrap();

        replicated.remove(&1).unwrap();
        assert!(!local.contains(&1));
        assert!(!peer.contains(&1));
    }

    #[test]
    fn test_replicated_remove_local_spares_peers() {
        let local = Arc::new(InMemoryCacheBackend::<i64, String>::new());
        let peer = Arc::new(InMemoryCacheBackend::<i64, String>::new());
        let replicated = ReplicatedCacheBackend::new(local.clone()).with_peer(peer.clone());

        replicated.put(1, CacheSlot::Absent).unwrap();
        peer.put(1, CacheSlot::Absent).unwrap();

        replicated.remove_local(&1).unwrap();
        assert!(!local.contains(&1));
        assert!(peer.contains(&1));
        assert_eq!(replicated.peer_count(), 1);
    }

    #[test]
    fn test_replicated_bulk_remove() {
        let local = Arc::new(InMemoryCacheBackend::<i64, String>::new());
        let peer = Arc::new(InMemoryCacheBackend::<i64, String>::new());
        let replicated = ReplicatedCacheBackend::new(local.clone()).with_peer(peer.clone());

        for key in 1..=3 {
            local.put(key, CacheSlot::Absent).unwrap();
            peer.put(key, CacheSlot::Absent).unwrap();
        }
        let keys: BTreeSet<i64> = [1, 2].into_iter().collect();

        replicated.remove_all_local(&keys).unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(peer.len(), 3);

        replicated.remove_all(&keys).unwrap();
        assert_eq!(peer.len(), 1);
    }
}
