//! Read-through cache over an [`EntityStore`].
//!
//! Reads consult the backend first and fall back to the store on a miss,
//! recording the outcome either way. A store answer of "no such row" is kept
//! as [`CacheSlot::Absent`] so repeated lookups of a missing key never reach
//! the store again until the key is invalidated.

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use modelkit_core::{ChangeKind, Entity, StoreResult};
use tracing::{debug, trace};

use super::traits::{CacheBackend, CacheSlot, CacheStats};
use crate::EntityStore;

/// Read-through cache for one entity family.
///
/// # Type Parameters
///
/// - `E`: the cached entity
/// - `S`: the store consulted on a miss
/// - `B`: the cache backend holding the slots
pub struct ReadThroughCache<E, S, B>
where
    E: Entity,
    S: EntityStore<E>,
    B: CacheBackend<E::Key, E>,
{
    store: Arc<S>,
    backend: Arc<B>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, S, B> Clone for ReadThroughCache<E, S, B>
where
    E: Entity,
    S: EntityStore<E>,
    B: CacheBackend<E::Key, E>,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            _entity: PhantomData,
        }
    }
}

impl<E, S, B> ReadThroughCache<E, S, B>
where
    E: Entity,
    S: EntityStore<E>,
    B: CacheBackend<E::Key, E>,
{
    pub fn new(store: Arc<S>, backend: Arc<B>) -> Self {
        Self {
            store,
            backend,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }

    /// Get an entity, fetching and caching it on a miss.
    ///
    /// Returns `Ok(None)` when the store has no such row; that answer is
    /// cached too.
    pub fn get(&self, key: &E::Key) -> StoreResult<Option<E>> {
        if let Some(slot) = self.backend.get(key)? {
            trace!(kind = %E::entity_kind(), key = %key, absent = slot.is_absent(), "Cache hit");
            return Ok(slot.into_option());
        }

        trace!(kind = %E::entity_kind(), key = %key, "Cache miss");
        let generation = self.backend.generation()?;
        let fetched = self.store.fetch_by_id(key)?;
        self.fill(key.clone(), fetched.clone(), generation)?;
        Ok(fetched)
    }

    /// Get many entities. Every requested key appears in the result, mapped
    /// to `None` when the store has no such row.
    ///
    /// Cached slots are served directly; the remaining keys go to the store in
    /// a single batch and every one of them is cached afterwards, present or
    /// absent.
    pub fn get_all(&self, keys: &BTreeSet<E::Key>) -> StoreResult<HashMap<E::Key, Option<E>>> {
        let mut result = HashMap::with_capacity(keys.len());
        let mut to_load = keys.clone();

        while !to_load.is_empty() {
            for (key, slot) in self.backend.get_all(&to_load)? {
                to_load.remove(&key);
                result.insert(key, slot.into_option());
            }
            if to_load.is_empty() {
                break;
            }

            trace!(
                kind = %E::entity_kind(),
                misses = to_load.len(),
                "Batch fetching cache misses"
            );
            let generation = self.backend.generation()?;
            let mut fetched = self.store.fetch_by_ids(&to_load)?;
            for key in std::mem::take(&mut to_load) {
                let value = fetched.remove(&key);
                self.fill(key.clone(), value.clone(), generation)?;
                result.insert(key, value);
            }
        }

        Ok(result)
    }

    /// Cache a fetched value unless an invalidation ran since `generation`.
    /// The caller still returns what it fetched; the next read refetches.
    fn fill(&self, key: E::Key, value: Option<E>, generation: u64) -> StoreResult<()> {
        let stored = self
            .backend
            .put_if_generation(key.clone(), CacheSlot::from_option(value), generation)?;
        if !stored {
            debug!(kind = %E::entity_kind(), key = %key, "Invalidated during fetch, not caching");
        }
        Ok(())
    }

    /// Drop `key` on every node.
    pub fn invalidate(&self, key: &E::Key, cause: ChangeKind) -> StoreResult<()> {
        debug!(kind = %E::entity_kind(), key = %key, cause = %cause, "Invalidating cache entry");
        self.backend.remove(key)
    }

    /// Drop `key` on this node only.
    pub fn invalidate_local(&self, key: &E::Key, cause: ChangeKind) -> StoreResult<()> {
        debug!(
            kind = %E::entity_kind(),
            key = %key,
            cause = %cause,
            "Invalidating local cache entry"
        );
        self.backend.remove_local(key)
    }

    pub fn invalidate_all(&self, keys: &BTreeSet<E::Key>, cause: ChangeKind) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        debug!(
            kind = %E::entity_kind(),
            count = keys.len(),
            cause = %cause,
            "Invalidating cache entries"
        );
        self.backend.remove_all(keys)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use crate::memory::InMemoryStore;
    use crate::Merged;
    use modelkit_core::EntityKind;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: Option<i64>,
        text: String,
    }

    impl Entity for Note {
        type Key = i64;

        fn entity_kind() -> EntityKind {
            EntityKind::new("note")
        }

        fn key(&self) -> Option<i64> {
            self.id
        }

        fn set_key(&mut self, key: i64) {
            self.id = Some(key);
        }
    }

    type NoteCache = ReadThroughCache<Note, InMemoryStore<Note>, InMemoryCacheBackend<i64, Note>>;

    fn make_test_cache(texts: &[&str]) -> (Arc<InMemoryStore<Note>>, NoteCache) {
        let store = Arc::new(InMemoryStore::new());
        store
            .seed(texts.iter().map(|t| Note {
                id: None,
                text: t.to_string(),
            }))
            .unwrap();
        let cache = ReadThroughCache::new(store.clone(), Arc::new(InMemoryCacheBackend::new()));
        (store, cache)
    }

    type Writer = Box<dyn FnOnce() + Send>;

    /// Store that runs a competing writer after a fetch has read the row but
    /// before the cache has been filled.
    struct RacingStore {
        inner: Arc<InMemoryStore<Note>>,
        writer: Mutex<Option<Writer>>,
    }

    impl RacingStore {
        fn run_writer(&self) {
            let writer = self.writer.lock().unwrap().take();
            if let Some(writer) = writer {
                writer();
            }
        }
    }

    impl EntityStore<Note> for RacingStore {
        fn fetch_by_id(&self, key: &i64) -> StoreResult<Option<Note>> {
            let fetched = self.inner.fetch_by_id(key)?;
            self.run_writer();
            Ok(fetched)
        }

        fn fetch_by_ids(&self, keys: &BTreeSet<i64>) -> StoreResult<HashMap<i64, Note>> {
            let fetched = self.inner.fetch_by_ids(keys)?;
            self.run_writer();
            Ok(fetched)
        }

        fn persist_new(&self, entity: Note) -> StoreResult<Note> {
            self.inner.persist_new(entity)
        }

        fn merge_existing(&self, entity: Note) -> StoreResult<Merged<Note>> {
            self.inner.merge_existing(entity)
        }

        fn delete(&self, entity: &Note) -> StoreResult<()> {
            self.inner.delete(entity)
        }

        fn find_by_unique(&self, column: &str, value: &str) -> StoreResult<Option<i64>> {
            self.inner.find_by_unique(column, value)
        }
    }

    /// Cache over a store whose next fetch races a commit of `text` to row 1
    /// followed by an invalidation.
    fn make_racing_cache(
        text: &'static str,
    ) -> (
        Arc<InMemoryStore<Note>>,
        ReadThroughCache<Note, RacingStore, InMemoryCacheBackend<i64, Note>>,
    ) {
        let (inner, _) = make_test_cache(&["a"]);
        let backend: Arc<InMemoryCacheBackend<i64, Note>> = Arc::new(InMemoryCacheBackend::new());

        let writer: Writer = {
            let inner = inner.clone();
            let backend = backend.clone();
            Box::new(move || {
                let mut note = inner.row(&1).unwrap();
                note.text = text.to_string();
                inner.merge_existing(note).unwrap();
                backend.remove(&1).unwrap();
            })
        };
        let store = Arc::new(RacingStore {
            inner: inner.clone(),
            writer: Mutex::new(Some(writer)),
        });
        (inner, ReadThroughCache::new(store, backend))
    }

    #[test]
    fn test_invalidation_during_fetch_is_not_overwritten() {
        let (inner, cache) = make_racing_cache("b");

        // The in-flight read returns what it fetched but must not cache it.
        assert_eq!(cache.get(&1).unwrap().unwrap().text, "a");
        assert_eq!(cache.stats().entry_count, 0);

        assert_eq!(cache.get(&1).unwrap().unwrap().text, "b");
        assert_eq!(cache.get(&1).unwrap().unwrap().text, "b");
        assert_eq!(inner.stats().fetch_by_id, 2);
    }

    #[test]
    fn test_batch_invalidation_during_fetch_is_not_overwritten() {
        let (inner, cache) = make_racing_cache("c");
        let keys: BTreeSet<i64> = [1].into_iter().collect();

        let first = cache.get_all(&keys).unwrap();
        assert_eq!(first[&1].as_ref().map(|n| n.text.as_str()), Some("a"));

        let second = cache.get_all(&keys).unwrap();
        assert_eq!(second[&1].as_ref().map(|n| n.text.as_str()), Some("c"));
        assert_eq!(inner.stats().fetch_by_ids, 2);
    }

    #[test]
    fn test_get_caches_present_value() {
        let (store, cache) = make_test_cache(&["a"]);

        let first = cache.get(&1).unwrap().unwrap();
        let second = cache.get(&1).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.text, "a");
        assert_eq!(store.stats().fetch_by_id, 1);
    }

    #[test]
    fn test_missing_key_is_negatively_cached() {
        let (store, cache) = make_test_cache(&[]);

        assert!(cache.get(&7).unwrap().is_none());
        assert!(cache.get(&7).unwrap().is_none());
        assert_eq!(store.stats().fetch_by_id, 1);
        assert_eq!(cache.stats().negative_hits, 1);
    }

    #[test]
    fn test_get_all_fetches_only_misses() {
        let (store, cache) = make_test_cache(&["a", "b"]);
        cache.get(&1).unwrap();

        let keys: BTreeSet<i64> = [1, 2].into_iter().collect();
        let found = cache.get_all(&keys).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[&2].as_ref().map(|n| n.text.as_str()), Some("b"));
        assert_eq!(store.stats().batches, vec![vec![2]]);
    }

    #[test]
    fn test_get_all_caches_absent_keys() {
        let (store, cache) = make_test_cache(&["a"]);
        let keys: BTreeSet<i64> = [1, 9].into_iter().collect();

        let found = cache.get_all(&keys).unwrap();
        assert!(found[&9].is_none());

        cache.get_all(&keys).unwrap();
        assert!(cache.get(&9).unwrap().is_none());
        assert_eq!(store.stats().reads(), 1);
    }

    #[test]
    fn test_get_all_fully_cached_skips_store() {
        let (store, cache) = make_test_cache(&["a"]);
        cache.get(&1).unwrap();
        store.reset_stats();

        let keys: BTreeSet<i64> = [1].into_iter().collect();
        cache.get_all(&keys).unwrap();
        assert_eq!(store.stats().reads(), 0);
    }

    #[test]
    fn test_invalidate_forces_refetch() {
        let (store, cache) = make_test_cache(&["a"]);

        cache.get(&1).unwrap();
        cache.invalidate(&1, ChangeKind::Update).unwrap();
        cache.get(&1).unwrap();

        assert_eq!(store.stats().fetch_by_id, 2);
        assert_eq!(cache.stats().removals, 1);
    }

    #[test]
    fn test_invalidate_does_not_repopulate() {
        let (store, cache) = make_test_cache(&["a"]);
        cache.get(&1).unwrap();
        cache.invalidate_local(&1, ChangeKind::Delete).unwrap();

        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(store.stats().fetch_by_id, 1);
    }

    #[test]
    fn test_invalidate_all() {
        let (store, cache) = make_test_cache(&["a", "b"]);
        let keys: BTreeSet<i64> = [1, 2].into_iter().collect();
        cache.get_all(&keys).unwrap();

        cache.invalidate_all(&keys, ChangeKind::Update).unwrap();
        cache.get_all(&keys).unwrap();
        assert_eq!(store.stats().fetch_by_ids, 2);
    }

    #[test]
    fn test_returned_values_are_owned_copies() {
        let (_store, cache) = make_test_cache(&["a"]);
        let mut copy = cache.get(&1).unwrap().unwrap();
        copy.text.push_str("-changed");

        assert_eq!(cache.get(&1).unwrap().unwrap().text, "a");
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use crate::memory::InMemoryStore;
    use modelkit_core::EntityKind;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tag {
        id: Option<u64>,
    }

    impl Entity for Tag {
        type Key = u64;

        fn entity_kind() -> EntityKind {
            EntityKind::new("tag")
        }

        fn key(&self) -> Option<u64> {
            self.id
        }

        fn set_key(&mut self, key: u64) {
            self.id = Some(key);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Repeated bulk reads never fetch a key twice, whether or not it
        /// exists.
        #[test]
        fn prop_each_key_fetched_once(
            stored in 0usize..8,
            rounds in prop::collection::vec(prop::collection::btree_set(1u64..16, 0..8), 1..6)
        ) {
            let store = Arc::new(InMemoryStore::new());
            store.seed((0..stored).map(|_| Tag { id: None })).unwrap();
            let cache = ReadThroughCache::new(store.clone(), Arc::new(InMemoryCacheBackend::new()));

            let mut requested = BTreeSet::new();
            for keys in &rounds {
                let found = cache.get_all(keys).unwrap();
                prop_assert_eq!(found.len(), keys.len());
                for key in keys {
                    prop_assert_eq!(found[key].is_some(), *key <= stored as u64);
                }
                requested.extend(keys.iter().copied());
            }

            let fetched: Vec<u64> = store.stats().batches.into_iter().flatten().collect();
            let distinct: BTreeSet<u64> = fetched.iter().copied().collect();
            prop_assert_eq!(fetched.len(), distinct.len());
            prop_assert_eq!(distinct, requested);
        }
    }
}
